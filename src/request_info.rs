use actix_web::{dev::Payload, http::header::HeaderMap, Error, FromRequest, HttpRequest};

const UNKNOWN: &str = "unknown";

/// Client address and user agent, recorded on audit entries and security events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl RequestInfo {
    /// The first `X-Forwarded-For` hop wins over the peer address.
    pub fn from_parts(headers: &HeaderMap, peer: Option<String>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);

        let user_agent = headers
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .filter(|ua| !ua.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string();

        Self {
            ip_address: forwarded.or(peer).unwrap_or_else(|| UNKNOWN.to_string()),
            user_agent,
        }
    }

    pub fn from_http_request(req: &HttpRequest) -> Self {
        let peer = req.peer_addr().map(|addr| addr.ip().to_string());
        Self::from_parts(req.headers(), peer)
    }
}

impl FromRequest for RequestInfo {
    type Error = Error;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        std::future::ready(Ok(RequestInfo::from_http_request(req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1"), ("user-agent", "curl/8.0")]);
        let info = RequestInfo::from_parts(&map, Some("10.0.0.2".to_string()));
        assert_eq!(info.ip_address, "203.0.113.7");
        assert_eq!(info.user_agent, "curl/8.0");
    }

    #[test]
    fn test_falls_back_to_peer_then_unknown() {
        let map = headers(&[]);
        let info = RequestInfo::from_parts(&map, Some("10.0.0.2".to_string()));
        assert_eq!(info.ip_address, "10.0.0.2");
        assert_eq!(info.user_agent, "unknown");

        let info = RequestInfo::from_parts(&map, None);
        assert_eq!(info.ip_address, "unknown");
    }
}
