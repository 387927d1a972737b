//! The response body.
//!
//! Every response the handler produces is either empty or one buffer
//! (a file, or a rendered XML document), so `Body` holds at most one
//! `Bytes` and yields it as a single frame.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use http_body::{Body as HttpBody, Frame, SizeHint};

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
#[derive(Debug, Default)]
pub struct Body {
    data: Option<Bytes>,
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body::default()
    }

    fn len(&self) -> u64 {
        self.data.as_ref().map_or(0, |b| b.len() as u64)
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Option<Self::Item>> {
        // an empty buffer is not worth a frame.
        let data = self.data.take().filter(|b| !b.is_empty());
        Poll::Ready(data.map(Ok))
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|item| item.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.len() == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.len())
    }
}

macro_rules! body_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Body {
            fn from(t: $t) -> Body {
                Body {
                    data: Some(Bytes::from(t)),
                }
            }
        })*
    };
}

body_from!(String, Vec<u8>, Bytes);

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body::from(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn one_frame() {
        let mut body = Body::from("hello");
        assert_eq!(HttpBody::size_hint(&body).exact(), Some(5));
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("hello"));
        assert!(body.next().await.is_none());
        assert!(body.is_end_stream());

        let mut body = Body::from(String::new());
        assert!(body.is_end_stream());
        assert!(body.next().await.is_none());
    }
}
