//! URL tokenizer
//!
//! Splits a URL string into lowercased tokens tagged with the component
//! they came from. Consumed by the URL field inverter to feed the seven
//! sub-streams.

/// Component a URL token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTokenKind {
    Scheme,
    Host,
    Port,
    Path,
    Query,
    Fragment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlToken {
    pub kind: UrlTokenKind,
    pub text: String,
}

fn push_tokens(out: &mut Vec<UrlToken>, kind: UrlTokenKind, part: &str) {
    for run in part.split(|c: char| !c.is_alphanumeric()) {
        if !run.is_empty() {
            out.push(UrlToken {
                kind,
                text: run.to_lowercase(),
            });
        }
    }
}

/// Tokenize `url` into component-tagged tokens, in text order.
pub fn tokenize_url(url: &str) -> Vec<UrlToken> {
    let mut tokens = Vec::new();
    let mut rest = url;

    if let Some(idx) = rest.find("://") {
        push_tokens(&mut tokens, UrlTokenKind::Scheme, &rest[..idx]);
        rest = &rest[idx + 3..];
    }

    let authority_end = rest
        .find(|c| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    rest = &rest[authority_end..];

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            (host, Some(port))
        }
        _ => (authority, None),
    };
    push_tokens(&mut tokens, UrlTokenKind::Host, host);
    if let Some(port) = port {
        tokens.push(UrlToken {
            kind: UrlTokenKind::Port,
            text: port.to_string(),
        });
    }

    let fragment = match rest.find('#') {
        Some(idx) => {
            let fragment = &rest[idx + 1..];
            rest = &rest[..idx];
            Some(fragment)
        }
        None => None,
    };
    let query = match rest.find('?') {
        Some(idx) => {
            let query = &rest[idx + 1..];
            rest = &rest[..idx];
            Some(query)
        }
        None => None,
    };
    push_tokens(&mut tokens, UrlTokenKind::Path, rest);
    if let Some(query) = query {
        push_tokens(&mut tokens, UrlTokenKind::Query, query);
    }
    if let Some(fragment) = fragment {
        push_tokens(&mut tokens, UrlTokenKind::Fragment, fragment);
    }
    tokens
}

/// True for the default ports of the common schemes; those tokens are
/// not indexed.
pub fn is_default_port(port: &str) -> bool {
    port == "80" || port == "443"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_texts(url: &str) -> Vec<(UrlTokenKind, String)> {
        tokenize_url(url)
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_full_url() {
        use UrlTokenKind::*;
        assert_eq!(
            kinds_and_texts("http://host.example:8080/p/q.html?x=1#frag"),
            vec![
                (Scheme, "http".to_string()),
                (Host, "host".to_string()),
                (Host, "example".to_string()),
                (Port, "8080".to_string()),
                (Path, "p".to_string()),
                (Path, "q".to_string()),
                (Path, "html".to_string()),
                (Query, "x".to_string()),
                (Query, "1".to_string()),
                (Fragment, "frag".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_scheme_no_port() {
        use UrlTokenKind::*;
        assert_eq!(
            kinds_and_texts("example.com/path"),
            vec![
                (Host, "example".to_string()),
                (Host, "com".to_string()),
                (Path, "path".to_string()),
            ]
        );
    }

    #[test]
    fn test_uppercase_is_lowered() {
        let tokens = tokenize_url("HTTP://WWW.Example.COM/Index");
        assert!(tokens.iter().all(|t| t.text == t.text.to_lowercase()));
        assert_eq!(tokens[0].text, "http");
    }

    #[test]
    fn test_default_ports() {
        assert!(is_default_port("80"));
        assert!(is_default_port("443"));
        assert!(!is_default_port("8080"));
    }
}
