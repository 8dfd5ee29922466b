//! Spatial request parameters.
//!
//! Coordinates are never transformed. A bbox is compared against another bbox
//! only as plain numbers in the same reference system and otherwise ends up in
//! upstream queries and cache keys verbatim.
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SpatialParseError {
    #[error("expected four comma separated numbers, got {0:?}")]
    BBoxFormat(String),
    #[error("bbox minimum must be below its maximum: {0:?}")]
    BBoxOrder(String),
    #[error("expected tile coordinate as z/x/y, got {0:?}")]
    TileFormat(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        BBox {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// True if both boxes share some area. Touching edges don't count.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.minx < other.maxx
            && other.minx < self.maxx
            && self.miny < other.maxy
            && other.miny < self.maxy
    }

    pub fn contains(&self, other: &BBox) -> bool {
        self.minx <= other.minx
            && self.miny <= other.miny
            && self.maxx >= other.maxx
            && self.maxy >= other.maxy
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BBox::new(
            self.minx.max(other.minx),
            self.miny.max(other.miny),
            self.maxx.min(other.maxx),
            self.maxy.min(other.maxy),
        ))
    }
}

impl FromStr for BBox {
    type Err = SpatialParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SpatialParseError::BBoxFormat(s.to_string()))?;

        let &[minx, miny, maxx, maxy] = values.as_slice() else {
            return Err(SpatialParseError::BBoxFormat(s.to_string()));
        };
        if !values.iter().all(|v| v.is_finite()) {
            return Err(SpatialParseError::BBoxFormat(s.to_string()));
        }
        if minx >= maxx || miny >= maxy {
            return Err(SpatialParseError::BBoxOrder(s.to_string()));
        }
        Ok(BBox::new(minx, miny, maxx, maxy))
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.minx, self.miny, self.maxx, self.maxy)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl FromStr for TileCoord {
    type Err = SpatialParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('/')
            .map(|v| v.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SpatialParseError::TileFormat(s.to_string()))?;

        match parts[..] {
            [z, x, y] => Ok(TileCoord { z, x, y }),
            _ => Err(SpatialParseError::TileFormat(s.to_string())),
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Handling of a request bbox that overlaps the layer bbox only partially.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BBoxPolicy {
    /// Forward the request bbox unchanged
    #[default]
    Allow,
    /// Clip the request to the layer bbox and scale the image size with it
    Clip,
    /// Reject the request as out of bounds
    Reject,
}

/// Spatial parameters of a resolved request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpatialParams {
    pub srs: Option<String>,
    pub bbox: Option<BBox>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub tile: Option<TileCoord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            "-180,-90,180,90".parse::<BBox>().unwrap(),
            BBox::new(-180.0, -90.0, 180.0, 90.0)
        );
        assert_eq!(
            " 0.5, 1 ,2,3 ".parse::<BBox>().unwrap(),
            BBox::new(0.5, 1.0, 2.0, 3.0)
        );
        assert!(matches!(
            "1,2,3".parse::<BBox>(),
            Err(SpatialParseError::BBoxFormat(_))
        ));
        assert!(matches!(
            "a,b,c,d".parse::<BBox>(),
            Err(SpatialParseError::BBoxFormat(_))
        ));
        assert!(matches!(
            "10,0,5,10".parse::<BBox>(),
            Err(SpatialParseError::BBoxOrder(_))
        ));
    }

    #[test]
    fn test_bbox_display() {
        let bbox: BBox = "-180,-90,180,90.5".parse().unwrap();
        assert_eq!(bbox.to_string(), "-180,-90,180,90.5");
    }

    #[test]
    fn test_bbox_relations() {
        let layer = BBox::new(0.0, 0.0, 10.0, 10.0);

        assert!(layer.intersects(&BBox::new(5.0, 5.0, 15.0, 15.0)));
        assert!(!layer.intersects(&BBox::new(10.0, 0.0, 20.0, 10.0)));
        assert!(!layer.intersects(&BBox::new(20.0, 20.0, 30.0, 30.0)));

        assert!(layer.contains(&BBox::new(1.0, 1.0, 9.0, 9.0)));
        assert!(!layer.contains(&BBox::new(5.0, 5.0, 15.0, 15.0)));

        assert_eq!(
            layer.intersection(&BBox::new(5.0, -5.0, 15.0, 5.0)),
            Some(BBox::new(5.0, 0.0, 10.0, 5.0))
        );
        assert_eq!(layer.intersection(&BBox::new(20.0, 20.0, 30.0, 30.0)), None);
    }

    #[test]
    fn test_parse_tile() {
        assert_eq!(
            "3/4/5".parse::<TileCoord>().unwrap(),
            TileCoord { z: 3, x: 4, y: 5 }
        );
        assert!("3/4".parse::<TileCoord>().is_err());
        assert!("3/-4/5".parse::<TileCoord>().is_err());
        assert_eq!(TileCoord { z: 1, x: 0, y: 1 }.to_string(), "1/0/1");
    }
}
