//! 文字清理：ASCII 轉寫、樣本名稱淨化

/// 常見拉丁字母的 ASCII 轉寫；沒有對應的非 ASCII 字元回傳 None
fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' | 'Ć' | 'Č' => "C",
        'ç' | 'ć' | 'č' => "c",
        'Ð' | 'Ď' => "D",
        'ð' | 'ď' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'Ł' => "L",
        'ł' => "l",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ñ' | 'ń' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'Œ' => "OE",
        'œ' => "oe",
        'Ř' => "R",
        'ř' => "r",
        'Ś' | 'Š' => "S",
        'ś' | 'š' => "s",
        'ß' => "ss",
        'Ť' => "T",
        'ť' => "t",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'Ý' | 'Ÿ' => "Y",
        'ý' | 'ÿ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        'µ' | 'μ' => "u",
        '–' | '—' => "-",
        '‘' | '’' => "'",
        '“' | '”' => "\"",
        '\u{00A0}' => " ",
        _ => return None,
    };
    Some(folded)
}

pub fn ascii_fold(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii() {
            out.push(c);
        } else if let Some(folded) = fold_char(c) {
            out.push_str(folded);
        }
    }
    out
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 所有欄位值的通用清理，與欄位型別無關
pub fn clean_text(input: &str) -> String {
    let folded: String = ascii_fold(input)
        .chars()
        .map(|c| if c.is_ascii_control() { ' ' } else { c })
        .collect();
    collapse_whitespace(&folded)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | ':' | ',' | '.')
}

/// 樣本名稱淨化：`+` 改寫為 `Plus`，只保留 `[A-Za-z0-9 :,.]`
pub fn sanitize_name(input: &str) -> String {
    let folded = ascii_fold(input).replace('+', "Plus");
    let kept: String = folded.chars().filter(|c| is_name_char(*c)).collect();
    collapse_whitespace(&kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Sample #1 (A+B)"), "Sample 1 APlusB");
        assert_eq!(sanitize_name("Café-01"), "Cafe01");
        assert_eq!(sanitize_name("  mouse/tail  snip "), "mousetail snip");
        assert_eq!(sanitize_name("a:b,c.d"), "a:b,c.d");
        assert_eq!(sanitize_name("Sample_1-x"), "Sample1x");
        assert_eq!(sanitize_name("tail_snip - 2"), "tailsnip 2");
        assert_eq!(sanitize_name("日本"), "");
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Ångström\tsample\n"), "Angstrom sample");
        assert_eq!(clean_text("5 µL"), "5 uL");
        assert_eq!(clean_text("a (b) #c"), "a (b) #c");
    }
}
