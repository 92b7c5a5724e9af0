//! URL router: path grammar → (endpoint, server_id, session_id, transport)
//! (§4.7).
//!
//! The router never touches session state — it only classifies a path into
//! one of the five route kinds below, or fails with [`RouteError::NotFound`].
//! [`crate::application::Application`] combines this with endpoint lookup to
//! produce 404s for unknown endpoints.

use std::sync::LazyLock;

use regex::Regex;

static IFRAME_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^iframe[0-9\-.a-z_]*\.html$").expect("valid regex"));

/// The classified shape of a request path, once the endpoint segment (if
/// any) has been stripped off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// `""`, `"/"`, `"/<ep>"`, or `"/<ep>/"`.
    Greeting,
    /// `"/<ep>/info"`.
    Info,
    /// `"/<ep>/iframeXXX.html"`.
    Iframe,
    /// `"/<ep>/websocket"` — session_id is generated fresh by the caller.
    RawWebSocket,
    /// `"/<ep>/<server_id>/<session_id>/<transport>"`.
    Transport {
        server_id: String,
        session_id: String,
        transport: String,
    },
}

/// A fully classified route: which endpoint (if any, `None` only for the
/// bare `"/"` greeting) and what kind of request it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub endpoint: Option<String>,
    pub kind: RouteKind,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("not found")]
    NotFound,
}

fn is_valid_path_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('.')
}

/// Classify `path` (the request's `PATH_INFO`) per the grammar in §4.7.
///
/// This does not check whether the resolved endpoint actually exists;
/// callers must 404 themselves on an unknown endpoint name.
pub fn route(path: &str) -> Result<RouteMatch, RouteError> {
    let mut segments = path.split('/').peekable();
    // A leading "/" produces an empty first segment; drop it like PATH_INFO
    // split in the source grammar does.
    if segments.peek() == Some(&"") {
        segments.next();
    }
    let mut segments: Vec<&str> = segments.collect();

    let Some(endpoint) = segments.first().copied() else {
        return Ok(RouteMatch {
            endpoint: None,
            kind: RouteKind::Greeting,
        });
    };

    if endpoint.is_empty() {
        return Ok(RouteMatch {
            endpoint: None,
            kind: RouteKind::Greeting,
        });
    }

    segments.remove(0);
    let endpoint = endpoint.to_string();

    let Some(first) = segments.first().copied() else {
        return Ok(RouteMatch {
            endpoint: Some(endpoint),
            kind: RouteKind::Greeting,
        });
    };

    if first.is_empty() {
        return if segments.len() == 1 {
            // "/<ep>/"
            Ok(RouteMatch {
                endpoint: Some(endpoint),
                kind: RouteKind::Greeting,
            })
        } else {
            // "/<ep>//"
            Err(RouteError::NotFound)
        };
    }

    if first == "info" {
        return match segments.len() {
            1 => Ok(RouteMatch {
                endpoint: Some(endpoint),
                kind: RouteKind::Info,
            }),
            2 if segments[1].is_empty() => Ok(RouteMatch {
                endpoint: Some(endpoint),
                kind: RouteKind::Info,
            }),
            _ => Err(RouteError::NotFound),
        };
    }

    if first.starts_with("iframe") {
        return if segments.len() == 1 && IFRAME_PATH.is_match(first) {
            Ok(RouteMatch {
                endpoint: Some(endpoint),
                kind: RouteKind::Iframe,
            })
        } else {
            Err(RouteError::NotFound)
        };
    }

    if first == "websocket" {
        return if segments.len() == 1 {
            Ok(RouteMatch {
                endpoint: Some(endpoint),
                kind: RouteKind::RawWebSocket,
            })
        } else {
            Err(RouteError::NotFound)
        };
    }

    // Only remaining valid shape: /<ep>/<server_id>/<session_id>/<transport>
    if segments.len() != 3 {
        return Err(RouteError::NotFound);
    }

    let server_id = segments[0];
    let session_id = segments[1];
    let transport = segments[2];

    if !is_valid_path_segment(server_id)
        || !is_valid_path_segment(session_id)
        || transport.is_empty()
    {
        return Err(RouteError::NotFound);
    }

    Ok(RouteMatch {
        endpoint: Some(endpoint),
        kind: RouteKind::Transport {
            server_id: server_id.to_string(),
            session_id: session_id.to_string(),
            transport: transport.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_root_are_greeting() {
        assert_eq!(
            route("").unwrap(),
            RouteMatch {
                endpoint: None,
                kind: RouteKind::Greeting
            }
        );
        assert_eq!(
            route("/").unwrap(),
            RouteMatch {
                endpoint: None,
                kind: RouteKind::Greeting
            }
        );
    }

    #[test]
    fn endpoint_alone_is_greeting() {
        let m = route("/echo").unwrap();
        assert_eq!(m.endpoint.as_deref(), Some("echo"));
        assert_eq!(m.kind, RouteKind::Greeting);

        let m = route("/echo/").unwrap();
        assert_eq!(m.kind, RouteKind::Greeting);
    }

    #[test]
    fn double_slash_after_endpoint_is_404() {
        assert_eq!(route("/echo//"), Err(RouteError::NotFound));
    }

    #[test]
    fn info_routes() {
        assert_eq!(route("/echo/info").unwrap().kind, RouteKind::Info);
        assert_eq!(route("/echo/info/").unwrap().kind, RouteKind::Info);
        assert_eq!(route("/echo/info/extra"), Err(RouteError::NotFound));
    }

    #[test]
    fn iframe_routes() {
        assert_eq!(
            route("/echo/iframe-0.1.2.html").unwrap().kind,
            RouteKind::Iframe
        );
        assert_eq!(route("/echo/iframe"), Err(RouteError::NotFound));
        assert_eq!(route("/echo/iframe.htm"), Err(RouteError::NotFound));
    }

    #[test]
    fn raw_websocket_route() {
        assert_eq!(
            route("/echo/websocket").unwrap().kind,
            RouteKind::RawWebSocket
        );
    }

    #[test]
    fn transport_route_validates_segments() {
        let m = route("/echo/abc/xyz/xhr").unwrap();
        assert_eq!(
            m.kind,
            RouteKind::Transport {
                server_id: "abc".to_string(),
                session_id: "xyz".to_string(),
                transport: "xhr".to_string(),
            }
        );

        assert_eq!(route("/echo/bar."), Err(RouteError::NotFound));
        assert_eq!(route("/echo/bar/baz."), Err(RouteError::NotFound));
        assert_eq!(route("/echo/bar/baz/gak/"), Err(RouteError::NotFound));
    }
}
