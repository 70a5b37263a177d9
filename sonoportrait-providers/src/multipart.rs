use crate::request::Body;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn png(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: "image/png".into(),
            bytes,
        }
    }
}

/// `multipart/form-data` encoder. The whole body is built in memory.
#[derive(Debug)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::with_boundary(format!("Boundary-{}", uuid::Uuid::new_v4()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn optional_field(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() => self.field(name, v),
            _ => self,
        }
    }

    pub fn file(mut self, name: &str, file: &FilePart) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, file.filename
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.mime_type).as_bytes());
        self.body.extend_from_slice(&file.bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Closes the form. Returns the content type header value and the body.
    pub fn finish(mut self) -> (String, Body) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            self.content_type(),
            Body::MultipartFormData {
                boundary: self.boundary,
                bytes: self.body,
            },
        )
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_and_files_with_terminator() {
        let (ct, body) = MultipartForm::with_boundary("XYZ")
            .field("prompt", "baby")
            .optional_field("negative_prompt", Some("  "))
            .file("image", &FilePart::png("image.png", vec![0x89, b'P']))
            .finish();

        assert_eq!(ct, "multipart/form-data; boundary=XYZ");
        let Body::MultipartFormData { bytes, .. } = body else {
            panic!("expected multipart");
        };

        let mut expected = Vec::new();
        expected.extend_from_slice(
            b"--XYZ\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\nbaby\r\n",
        );
        expected.extend_from_slice(
            b"--XYZ\r\nContent-Disposition: form-data; name=\"image\"; filename=\"image.png\"\r\nContent-Type: image/png\r\n\r\n",
        );
        expected.extend_from_slice(&[0x89, b'P']);
        expected.extend_from_slice(b"\r\n--XYZ--\r\n");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn fresh_forms_get_distinct_boundaries() {
        assert_ne!(MultipartForm::new().boundary, MultipartForm::new().boundary);
    }
}
