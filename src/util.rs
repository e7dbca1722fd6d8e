use rand::seq::{IndexedRandom, SliceRandom};

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+";

/// Random password of exactly `len` characters with at least one symbol.
/// `rand::rng()` is a CSPRNG seeded from the OS.
pub fn generate_password(len: usize) -> String {
    let len = len.max(1);
    let mut rng = rand::rng();
    let pool: Vec<u8> = ALPHANUMERIC.iter().chain(SYMBOLS).copied().collect();

    let mut chars: Vec<u8> = Vec::with_capacity(len);
    if let Some(sym) = SYMBOLS.choose(&mut rng) {
        chars.push(*sym);
    }
    while chars.len() < len {
        if let Some(c) = pool.choose(&mut rng) {
            chars.push(*c);
        }
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// Loose shape check (`local@domain`), enough to reject obvious typos
/// before anything reaches Moodle.
pub fn looks_like_email(s: &str) -> bool {
    let s = s.trim();
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_has_length_and_a_symbol() {
        for len in [8, 12, 32] {
            for _ in 0..50 {
                let p = generate_password(len);
                assert_eq!(p.chars().count(), len);
                assert!(p.bytes().any(|b| SYMBOLS.contains(&b)), "no symbol in {p}");
                assert!(p.is_ascii());
            }
        }
    }

    #[test]
    fn passwords_differ() {
        assert_ne!(generate_password(16), generate_password(16));
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("ana@example.com"));
        assert!(!looks_like_email("ana.example.com"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("ana@"));
        assert!(!looks_like_email("a b@example.com"));
        assert!(!looks_like_email("a@b@c"));
    }
}
