//! Tile geocoding by affine interpolation inside the scene's projected
//! bounding box. No geodesic correction is applied here; true lat/lon comes
//! from an injected [`UtmInverse`] implementation.

use crate::error::Result;
use crate::scene::{Scene, SceneCorners, UtmZone};
use crate::tiles::TileAddr;

/// UTM false northing applied to southern-hemisphere scenes.
pub const SOUTHERN_FALSE_NORTHING: f64 = 10_000_000.0;

/// A point in geographic coordinates, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Inverse UTM projection `(x, y, zone) -> (lat, lon)`.
pub trait UtmInverse {
    fn to_lat_lon(&self, x: f64, y: f64, zone: UtmZone) -> Result<LatLon>;
}

/// Tile footprint in projected metres. `right`/`bottom` are present only
/// when the tile's pixel size is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: Option<f64>,
    pub bottom: Option<f64>,
}

/// Maps grid positions to projected coordinates for one scene.
#[derive(Debug, Clone, Copy)]
pub struct GeoMapper {
    corners: SceneCorners,
    grid_size: f64,
    width: f64,
    height: f64,
    zone: Option<UtmZone>,
}

impl GeoMapper {
    /// Mapper without a zone: no hemisphere adjustment, no lat/lon.
    pub fn new(corners: SceneCorners, grid_size: u32, (width, height): (u32, u32)) -> Self {
        Self {
            corners,
            grid_size: f64::from(grid_size),
            width: f64::from(width),
            height: f64::from(height),
            zone: None,
        }
    }

    pub fn with_zone(mut self, zone: UtmZone) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn for_scene(scene: &Scene) -> Self {
        Self::new(scene.corners, scene.grid_size, (scene.width, scene.height)).with_zone(scene.zone)
    }

    fn northing_offset(&self) -> f64 {
        match self.zone {
            Some(zone) if zone.is_southern() => -SOUTHERN_FALSE_NORTHING,
            _ => 0.0,
        }
    }

    /// Upper-left corner of the tile at `addr`.
    pub fn origin(&self, addr: TileAddr) -> BoundingBox {
        let c = &self.corners;
        let left = (f64::from(addr.col) * self.grid_size / self.width) * c.span_x() + c.ul_x;
        let top = (f64::from(addr.row) * self.grid_size / self.height) * c.span_y() + c.ul_y;
        BoundingBox {
            left,
            top: top + self.northing_offset(),
            right: None,
            bottom: None,
        }
    }

    /// Full footprint of a tile whose cropped size is `tile_w`×`tile_h` pixels.
    /// Edge tiles are usually narrower than the grid.
    pub fn bbox(&self, addr: TileAddr, (tile_w, tile_h): (u32, u32)) -> BoundingBox {
        let c = &self.corners;
        let origin = self.origin(addr);
        BoundingBox {
            right: Some(origin.left + (f64::from(tile_w) / self.width) * c.span_x()),
            bottom: Some(origin.top + (f64::from(tile_h) / self.height) * c.span_y()),
            ..origin
        }
    }

    /// Corner, centre and optional lat/lon metadata for one tile.
    pub fn locate(
        &self,
        addr: TileAddr,
        tile_px: (u32, u32),
        projector: Option<&dyn UtmInverse>,
    ) -> Result<TileGeo> {
        let bbox = self.bbox(addr, tile_px);
        // bbox() always fills both optional edges.
        let right = bbox.right.unwrap_or(bbox.left);
        let bottom = bbox.bottom.unwrap_or(bbox.top);
        let center_x = (bbox.left + right) / 2.0;
        let center_y = (bbox.top + bottom) / 2.0;
        let center = match (projector, self.zone) {
            (Some(p), Some(zone)) => Some(p.to_lat_lon(center_x, center_y, zone)?),
            _ => None,
        };
        Ok(TileGeo { bbox, center_x, center_y, center })
    }
}

/// Geocoded tile, ready to be flattened into a manifest record.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGeo {
    pub bbox: BoundingBox,
    pub center_x: f64,
    pub center_y: f64,
    pub center: Option<LatLon>,
}

impl TileGeo {
    /// Flat `(key, value)` pairs: all four corners, centre, and when a
    /// projector was supplied `center_lat`, `center_lon` and `map_link`.
    pub fn fields(&self) -> Vec<(String, String)> {
        let (l, t) = (self.bbox.left, self.bbox.top);
        let (r, b) = (self.bbox.right.unwrap_or(l), self.bbox.bottom.unwrap_or(t));
        let mut out: Vec<(String, String)> = [
            ("#tile_UL_x", l),
            ("#tile_UL_y", t),
            ("#tile_UR_x", r),
            ("#tile_UR_y", t),
            ("#tile_LL_x", l),
            ("#tile_LL_y", b),
            ("#tile_LR_x", r),
            ("#tile_LR_y", b),
            ("#tile_center_x", self.center_x),
            ("#tile_center_y", self.center_y),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        if let Some(ll) = self.center {
            out.push(("center_lat".to_string(), ll.lat.to_string()));
            out.push(("center_lon".to_string(), ll.lon.to_string()));
            out.push(("map_link".to_string(), map_link(ll)));
        }
        out
    }
}

/// Satellite-view map URL centred on `ll`.
pub fn map_link(ll: LatLon) -> String {
    format!(
        "http://maps.google.com/maps?q={0}+{1}&ll={0},{1}&t=k&z=12",
        ll.lat, ll.lon
    )
}
