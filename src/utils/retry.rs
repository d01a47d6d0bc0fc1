use crate::utils::error::{Result, TransferError};
use std::future::Future;
use std::time::Duration;

/// 遠端呼叫的逾時與重試設定
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            timeout,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

async fn attempt<T, Fut>(policy: &RetryPolicy, operation: &str, call: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(policy.timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::Timeout {
            operation: operation.to_string(),
            seconds: policy.timeout.as_secs(),
        }),
    }
}

/// 以逾時包裝遠端呼叫，暫時性錯誤依線性退避重試
///
/// 重試次數用盡時回傳 `RetriesExhausted`，其分類為 Structural。
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(policy, operation, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                if attempts >= policy.max_attempts {
                    return Err(TransferError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts,
                        source: Box::new(e),
                    });
                }
                tracing::warn!(
                    "🔁 {} failed (attempt {}/{}): {}",
                    operation,
                    attempts,
                    policy.max_attempts,
                    e
                );
                tokio::time::sleep(policy.delay * attempts).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 非冪等的建立呼叫：暫時性失敗之後先以 `lookup` 確認物件是否已經建立
///
/// 逾時或 5xx 時遠端可能已經完成建立，只是回應遺失。
/// `lookup` 找到物件就直接採用，找不到才重送建立請求。
pub async fn with_verified_retry<T, C, CFut, L, LFut>(
    policy: &RetryPolicy,
    operation: &str,
    mut create: C,
    mut lookup: L,
) -> Result<T>
where
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<T>>,
    L: FnMut() -> LFut,
    LFut: Future<Output = Result<Option<T>>>,
{
    let verify = format!("verify {}", operation);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match attempt(policy, operation, create()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };
        tracing::warn!(
            "🔁 {} failed (attempt {}/{}): {}, checking whether it went through",
            operation,
            attempts,
            policy.max_attempts,
            error
        );

        if let Some(value) = with_retry(policy, &verify, &mut lookup).await? {
            tracing::info!("🔎 {} had completed on the remote side", operation);
            return Ok(value);
        }
        if attempts >= policy.max_attempts {
            return Err(TransferError::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
                source: Box::new(error),
            });
        }
        tokio::time::sleep(policy.delay * attempts).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "create_sample", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransferError::RateLimited {
                    operation: "create_sample".to_string(),
                })
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(3), "create_project", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransferError::Conflict {
                resource: "project".to_string(),
                name: "P1".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(TransferError::Conflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(2), "list_requests", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(TransferError::RetriesExhausted {
                attempts, source, ..
            }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, TransferError::Timeout { .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lost_create_response_is_found_by_lookup() {
        let created = &AtomicU32::new(0);
        let lookups = &AtomicU32::new(0);
        let result = with_verified_retry(
            &fast_policy(3),
            "create_sample",
            move || async move {
                created.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TransferError::RemoteError {
                    status: 502,
                    message: "bad gateway".to_string(),
                })
            },
            move || async move {
                lookups.fetch_add(1, Ordering::SeqCst);
                Ok(Some("SMP-1".to_string()))
            },
        )
        .await;

        assert_eq!(result.unwrap(), "SMP-1");
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_is_resent_when_lookup_finds_nothing() {
        let created = &AtomicU32::new(0);
        let result = with_verified_retry(
            &fast_policy(3),
            "create_project",
            move || async move {
                if created.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TransferError::RateLimited {
                        operation: "create_project".to_string(),
                    })
                } else {
                    Ok("PRJ-1".to_string())
                }
            },
            || async { Ok(None) },
        )
        .await;

        assert_eq!(result.unwrap(), "PRJ-1");
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_verified_retry_gives_up_after_max_attempts() {
        let created = &AtomicU32::new(0);
        let result: Result<String> = with_verified_retry(
            &fast_policy(2),
            "create_container",
            move || async move {
                created.fetch_add(1, Ordering::SeqCst);
                Err(TransferError::RemoteError {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            },
            || async { Ok(None) },
        )
        .await;

        assert!(matches!(result, Err(TransferError::RetriesExhausted { attempts: 2, .. })));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
