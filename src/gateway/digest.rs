//! HTTP Digest access authentication (RFC 2617, MD5)

use md5::{Digest, Md5};
use rand::Rng;

/// Parameters of a `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

fn md5_hex(data: &str) -> String {
    hex::encode(Md5::digest(data.as_bytes()))
}

impl DigestChallenge {
    /// Parse a challenge header, `None` if it is not a Digest challenge
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let rest = header
            .get(..6)
            .filter(|scheme| scheme.eq_ignore_ascii_case("digest"))
            .map(|_| &header[6..])?;

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;
        for (key, value) in split_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            qop,
            opaque,
            algorithm,
        })
    }

    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|q| q.split(',').any(|v| v.trim() == "auth"))
            .unwrap_or(false)
    }

    /// `Authorization` header value for one request
    pub fn authorization(&self, user: &str, password: &str, method: &str, uri: &str) -> String {
        let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
        self.authorization_with(user, password, method, uri, &cnonce, 1)
    }

    pub(crate) fn authorization_with(
        &self,
        user: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
        nc: u32,
    ) -> String {
        let mut ha1 = md5_hex(&format!("{}:{}:{}", user, self.realm, password));
        let sess = self
            .algorithm
            .as_deref()
            .map(|a| a.eq_ignore_ascii_case("MD5-sess"))
            .unwrap_or(false);
        if sess {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = md5_hex(&format!("{}:{}", method, uri));
        let nc = format!("{:08x}", nc);

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            user, self.realm, self.nonce, uri
        );
        if self.supports_auth_qop() {
            let response = md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2));
            header.push_str(&format!(
                ", qop=auth, nc={}, cnonce=\"{}\", response=\"{}\"",
                nc, cnonce, response
            ));
        } else {
            let response = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2));
            header.push_str(&format!(", response=\"{}\"", response));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={}", algorithm));
        }
        header
    }
}

/// Split `key=value, key="quoted, value"` pairs
fn split_params(s: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.trim().is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut escaped = false;
            for c in chars.by_ref() {
                match c {
                    _ if escaped => {
                        value.push(c);
                        escaped = false;
                    }
                    '\\' => escaped = true,
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }
        params.push((key.trim().to_string(), value.trim().to_string()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(challenge.qop.as_deref(), Some("auth,auth-int"));
        assert_eq!(challenge.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert!(DigestChallenge::parse("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_rfc2617_response() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        let header = challenge.authorization_with(
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            "0a4f113b",
            1,
        );
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }
}
