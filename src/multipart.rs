//! `multipart/form-data` bodies.
//!
//! The form is encoded into a single buffer, which keeps the resulting
//! [`Body`](crate::Body) replayable across retries and 307/308 redirects.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

/// A `multipart/form-data` form.
///
/// # Examples
///
/// ```
/// use courier::multipart::{Form, Part};
///
/// let form = Form::new()
///     .text("title", "holiday")
///     .part("photo", Part::bytes(vec![0xff, 0xd8]).file_name("a.jpg").mime("image/jpeg"));
/// assert!(form.content_type().starts_with("multipart/form-data; boundary="));
/// ```
#[derive(Debug, Clone)]
pub struct Form {
    boundary: String,
    parts: Vec<(String, Part)>,
}

/// One field of a [`Form`].
#[derive(Debug, Clone)]
pub struct Part {
    data: Bytes,
    file_name: Option<String>,
    mime: Option<String>,
}

impl Form {
    /// Creates an empty form with a random boundary.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            boundary: format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>()),
            parts: Vec::new(),
        }
    }

    /// Adds a text field.
    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(name, Part::text(value))
    }

    /// Adds an arbitrary part.
    pub fn part(mut self, name: impl Into<String>, part: Part) -> Self {
        self.parts.push((name.into(), part));
        self
    }

    /// Returns the boundary separating the parts.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Returns the `Content-Type` header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, part) in &self.parts {
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
            if let Some(file_name) = &part.file_name {
                buf.put_slice(format!("; filename=\"{}\"", escape_quotes(file_name)).as_bytes());
            }
            buf.put_slice(b"\r\n");
            if let Some(mime) = part.content_type() {
                buf.put_slice(format!("Content-Type: {mime}\r\n").as_bytes());
            }
            buf.put_slice(b"\r\n");
            buf.put_slice(&part.data);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Part {
    /// A plain text part.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(value.into()),
            file_name: None,
            mime: None,
        }
    }

    /// A binary part.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            file_name: None,
            mime: None,
        }
    }

    /// Sets the file name reported for this part.
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Sets the `Content-Type` of this part.
    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    // File parts without an explicit type are sent as opaque bytes.
    fn content_type(&self) -> Option<&str> {
        match (&self.mime, &self.file_name) {
            (Some(mime), _) => Some(mime),
            (None, Some(_)) => Some("application/octet-stream"),
            (None, None) => None,
        }
    }
}

fn escape_quotes(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let form = Form::new()
            .text("greeting", "hello")
            .part("upload", Part::bytes(&b"\x00\x01"[..]).file_name("data.bin"));
        let boundary = form.boundary().to_string();
        let encoded = form.encode();

        let expected = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"greeting\"\r\n\r\nhello\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"data.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\x00\x01\r\n--{b}--\r\n",
            b = boundary
        );
        assert_eq!(encoded, Bytes::from(expected));
    }

    #[test]
    fn test_field_names_are_escaped() {
        let encoded = Form::new().text("a\"b", "v").encode();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.contains("name=\"a%22b\""));
    }

    #[test]
    fn test_boundaries_differ() {
        assert_ne!(Form::new().boundary(), Form::new().boundary());
    }
}
