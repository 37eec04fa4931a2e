//! A queued fetch attempt and its completion channel.

use crate::net::response::Response;
use crate::net::types::NetError;
use tokio::sync::oneshot;
use url::Url;

/// One request while it sits in a manager queue or rides an in-flight
/// connection.
///
/// The responder doubles as the cancellation signal: when the caller drops
/// its receiver the request is no longer wanted, which managers check
/// before dispatching. Once dispatched a request always runs to
/// completion; there is no mid-flight abort.
#[derive(Debug)]
pub struct Request {
    /// Request target: path plus query string
    pub path: String,
    /// Extra headers beyond the injected `Host`/`User-Agent` set
    pub headers: Vec<(String, String)>,
    responder: oneshot::Sender<Result<Response, NetError>>,
}

impl Request {
    /// Create a request and the receiver its completion arrives on.
    pub fn new(
        path: String,
        headers: Vec<(String, String)>,
    ) -> (Self, oneshot::Receiver<Result<Response, NetError>>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                path,
                headers,
                responder,
            },
            rx,
        )
    }

    /// Whether the caller has stopped waiting for this request.
    pub fn is_cancelled(&self) -> bool {
        self.responder.is_closed()
    }

    /// Deliver a response to the caller.
    pub fn complete(self, response: Response) {
        let _ = self.responder.send(Ok(response));
    }

    /// Deliver a failure to the caller.
    pub fn fail(self, error: NetError) {
        let _ = self.responder.send(Err(error));
    }
}

/// The origin-form request target for a URL: path plus optional query.
pub fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::response::Headers;
    use bytes::Bytes;

    #[test]
    fn test_complete_delivers_response() {
        let (request, mut rx) = Request::new("/a".to_string(), Vec::new());
        assert!(!request.is_cancelled());

        request.complete(Response {
            status: 200,
            headers: Headers::new(),
            body: Bytes::from_static(b"ok"),
        });

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"ok");
    }

    #[test]
    fn test_fail_delivers_error() {
        let (request, mut rx) = Request::new("/a".to_string(), Vec::new());
        request.fail(NetError::Dropped);
        assert_eq!(rx.try_recv().unwrap(), Err(NetError::Dropped));
    }

    #[test]
    fn test_dropped_receiver_marks_cancelled() {
        let (request, rx) = Request::new("/a".to_string(), Vec::new());
        drop(rx);
        assert!(request.is_cancelled());
    }

    #[test]
    fn test_request_target() {
        let url = Url::parse("https://example.com/tiles/3/2?v=1").unwrap();
        assert_eq!(request_target(&url), "/tiles/3/2?v=1");

        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(request_target(&url), "/");
    }
}
