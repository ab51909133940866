/// Masks a secret for logs: first and last four characters stay visible.
/// Secrets of eight characters or fewer are fully masked.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_middle_of_long_tokens() {
        assert_eq!(mask_token("abcdefghijklmnop"), "abcd****mnop");
    }

    #[test]
    fn short_tokens_are_fully_masked() {
        assert_eq!(mask_token(""), "****");
        assert_eq!(mask_token("12345678"), "****");
    }
}
