use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A bearer access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// An OpenID Connect ID token
#[braid(serde, debug = "owned", display = "owned")]
pub struct IdToken;

limited_reveal!(IdTokenRef: "ID TOKEN", 15);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_is_redacted_by_default() {
        let token = AccessToken::from_static("eyJhbGciOiJub25lIn0.payload.sig");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = IdToken::from_static("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(format!("{:#?}", token), "\"abcdefghijklmn…\"");
        assert_eq!(format!("{:#6?}", token), "\"abcde…\"");
        assert_eq!(format!("{:#}", token), "abcdefghijklmnopqrstuvwxyz");
    }
}
