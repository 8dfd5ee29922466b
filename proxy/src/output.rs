use bytes::Bytes;

/// Encoded image as returned to the client.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Bytes,
    pub content_type: String,
}

impl Image {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Image {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    /// The RGBA color of the image if every pixel has the same one. `None`
    /// for mixed images and for data that can't be decoded.
    pub fn single_color(&self) -> Option<[u8; 4]> {
        let decoded = image::load_from_memory(&self.data).ok()?.to_rgba8();
        let mut pixels = decoded.pixels();
        let first = *pixels.next()?;
        pixels.all(|p| *p == first).then_some(first.0)
    }
}

/// Response of a GetFeatureInfo request.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureInfo {
    pub data: Bytes,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Map(Image),
    FeatureInfo(FeatureInfo),
}

impl Response {
    pub fn data(&self) -> &Bytes {
        match self {
            Response::Map(image) => &image.data,
            Response::FeatureInfo(info) => &info.data,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Response::Map(image) => Some(&image.content_type),
            Response::FeatureInfo(info) => info.content_type.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{gradient_png, solid_png};

    #[test]
    fn test_single_color() {
        let red = Image::new(solid_png([255, 0, 0, 255], 16, 16), "image/png");
        assert_eq!(red.single_color(), Some([255, 0, 0, 255]));

        let transparent = Image::new(solid_png([0, 0, 0, 0], 4, 4), "image/png");
        assert_eq!(transparent.single_color(), Some([0, 0, 0, 0]));

        let mixed = Image::new(gradient_png(16, 16), "image/png");
        assert_eq!(mixed.single_color(), None);

        let broken = Image::new(&b"not an image"[..], "image/png");
        assert_eq!(broken.single_color(), None);
    }
}
