//! Adapters binding the core's collaborator traits to files on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ffimport_core::scene::KEY_UTM_ZONE;
use ffimport_core::stats::{Channel, ChannelStats, StatisticsProvider};
use ffimport_core::{LatLon, SceneMetadata, TileError, TileSizer, UtmInverse, UtmZone};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Suffix of the per-scene quality mask; its prefix names the scene.
pub const PIXEL_QA_SUFFIX: &str = "_pixel_qa.tif";

// ── Scene discovery ──────────────────────────────────────────────────────────

/// Scene name from the single `<name>_pixel_qa.tif` in `scene_dir`.
pub fn find_scene_name(scene_dir: &Path) -> Result<String> {
    let mut names: Vec<String> = fs::read_dir(scene_dir)
        .with_context(|| format!("Cannot read scene directory {}", scene_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.strip_suffix(PIXEL_QA_SUFFIX).map(str::to_string))
        .collect();
    names.sort();
    match names.len() {
        0 => bail!("No *{PIXEL_QA_SUFFIX} found in {}", scene_dir.display()),
        1 => Ok(names.remove(0)),
        n => bail!("{n} scenes found in {}: {}", scene_dir.display(), names.join(", ")),
    }
}

/// Pixel width and height of the scene's reference GeoTIFF.
pub fn scene_dimensions(path: &Path) -> Result<(u32, u32)> {
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder = tiff::decoder::Decoder::new(io::BufReader::new(file))
        .with_context(|| format!("Not a valid TIFF: {}", path.display()))?;
    let (width, height) = decoder
        .dimensions()
        .with_context(|| format!("Cannot read dimensions of {}", path.display()))?;
    if width == 0 || height == 0 {
        bail!("Zero-sized TIFF: {}", path.display());
    }
    Ok((width, height))
}

/// Sorted tile filenames with `extension` in `dir`.
pub fn list_tiles(dir: &Path, extension: &str) -> Result<Vec<String>> {
    let mut tiles: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Cannot list tiles in {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| ffimport_core::tiles::is_tile_file(name, extension))
        .collect();
    tiles.sort();
    Ok(tiles)
}

// ── Scene metadata XML ───────────────────────────────────────────────────────

/// Text fields always present in the map, empty when the XML lacks them.
const TEXT_FIELDS: [(&str, &str); 4] = [
    ("global_metadata/acquisition_date", "acquired_date"),
    ("global_metadata/scene_center_time", "acquired_time"),
    ("global_metadata/instrument", "sensor_id"),
    ("global_metadata/satellite", "spacecraft"),
];

const SOLAR_ANGLES: &str = "global_metadata/solar_angles";
const EARTH_SUN_DISTANCE: &str = "global_metadata/earth_sun_distance";
const ZONE_CODE: &str = "global_metadata/projection_information/utm_proj_params/zone_code";
const CORNER_POINT: &str = "global_metadata/projection_information/corner_point";
const BAND: &str = "bands/band";
const COVER: &str = "bands/band/percent_coverage/cover";

/// Element path below the document root plus the little state the ESPA
/// layout needs: which band we are in and which cover type is open.
#[derive(Default)]
struct EspaWalk {
    path: Vec<String>,
    in_cfmask: bool,
    cover_type: Option<String>,
    seen_solar: bool,
    meta: SceneMetadata,
}

impl EspaWalk {
    fn here(&self) -> String {
        self.path.iter().skip(1).map(String::as_str).collect::<Vec<_>>().join("/")
    }

    fn open(&mut self, e: &BytesStart<'_>) -> Result<()> {
        self.path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
        let here = self.here();
        match here.as_str() {
            SOLAR_ANGLES if !self.seen_solar => {
                self.seen_solar = true;
                let attrs = attributes(e)?;
                for (attr, key) in [("azimuth", "!sun_azimuth"), ("zenith", "!sun_zenith")] {
                    if let Some(value) = attrs.get(attr) {
                        self.meta.insert(key.to_string(), value.clone());
                    }
                }
            }
            CORNER_POINT => {
                let attrs = attributes(e)?;
                let Some(location) = attrs.get("location") else {
                    bail!("corner_point without a location attribute");
                };
                for axis in ["x", "y"] {
                    if let Some(value) = attrs.get(axis) {
                        self.meta.insert(format!("#scene_corner_{location}_{axis}"), value.clone());
                    }
                }
            }
            BAND => {
                self.in_cfmask = attributes(e)?.get("name").is_some_and(|n| n == "cfmask");
            }
            COVER => {
                self.cover_type = attributes(e)?.remove("type");
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        match self.path.pop().as_deref() {
            Some("band") => self.in_cfmask = false,
            Some("cover") => self.cover_type = None,
            _ => {}
        }
    }

    fn text(&mut self, text: String) {
        let here = self.here();
        let key = match here.as_str() {
            EARTH_SUN_DISTANCE => "!earth_sun_distance",
            ZONE_CODE => KEY_UTM_ZONE,
            COVER if self.in_cfmask => match self.cover_type.as_deref() {
                Some("cloud") => "!cloud_cover",
                Some("water") => "!water_cover",
                _ => return,
            },
            other => match TEXT_FIELDS.iter().find(|(path, _)| *path == other) {
                Some((_, key)) => *key,
                None => return,
            },
        };
        self.meta.insert(key.to_string(), text);
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.context("Malformed XML attribute")?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().context("Malformed XML attribute value")?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

/// Flatten ESPA scene metadata XML into the key map the core reads.
///
/// Keys: `!scene`, `acquired_date`, `acquired_time`, `sensor_id`,
/// `spacecraft`, `!earth_sun_distance`, `!sun_azimuth`, `!sun_zenith`,
/// `!cloud_cover` / `!water_cover` from the cfmask band, `#utm_zone` and
/// `#scene_corner_<LOC>_{x,y}` per corner point. Element namespaces are
/// ignored. A document without a UTM zone code is refused.
pub fn parse_espa_metadata(scene: &str, xml: &str) -> Result<SceneMetadata> {
    let mut walk = EspaWalk::default();
    walk.meta.insert("!scene".to_string(), scene.to_string());
    for (_, key) in TEXT_FIELDS {
        walk.meta.insert(key.to_string(), String::new());
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).context("Malformed scene metadata XML")? {
            Event::Start(ref e) => walk.open(e)?,
            Event::Empty(ref e) => {
                walk.open(e)?;
                walk.close();
            }
            Event::End(_) => walk.close(),
            Event::Text(e) => {
                let text = e.unescape().context("Malformed XML text")?;
                walk.text(text.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !walk.meta.contains_key(KEY_UTM_ZONE) {
        return Err(TileError::missing(KEY_UTM_ZONE).into());
    }
    Ok(walk.meta)
}

/// Read and flatten `<scene>.xml`.
pub fn load_espa_metadata(path: &Path, scene: &str) -> Result<SceneMetadata> {
    let xml = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    parse_espa_metadata(scene, &xml).with_context(|| format!("Cannot parse scene metadata {}", path.display()))
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Reads 16-bit gray mask tiles from `<scratch>/<channel>/<tile>`.
pub struct PngMaskStats {
    scratch: PathBuf,
}

impl PngMaskStats {
    pub fn new(scratch: impl Into<PathBuf>) -> Self {
        Self { scratch: scratch.into() }
    }
}

impl StatisticsProvider for PngMaskStats {
    fn stats(&self, channel: Channel, tile: &str) -> ffimport_core::Result<ChannelStats> {
        let path = self.scratch.join(channel.dir_name()).join(tile);
        let img = image::open(&path).map_err(|e| TileError::InvalidStatistics {
            channel,
            tile: tile.to_string(),
            detail: format!("cannot decode {}: {e}", path.display()),
        })?;
        let luma = img.into_luma16();
        ChannelStats::from_luma16(channel, tile, luma.as_raw())
    }
}

// ── Tile size ─────────────────────────────────────────────────────────────────

/// Reads pixel dimensions of colour scene tiles without decoding them.
pub struct PngTileSizer {
    dir: PathBuf,
}

impl PngTileSizer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TileSizer for PngTileSizer {
    fn dimensions(&self, tile: &str) -> ffimport_core::Result<(u32, u32)> {
        let path = self.dir.join(tile);
        image::image_dimensions(&path).map_err(|e| TileError::io(&path, io::Error::other(e)))
    }
}

// ── Inverse UTM ───────────────────────────────────────────────────────────────

/// WGS84 inverse UTM via proj4rs, bound to one scene zone.
///
/// Southern scenes arrive with the false northing already removed, so the
/// source projection is always the northern form of the zone.
pub struct Proj4Inverse {
    zone: UtmZone,
    utm: Proj,
    geographic: Proj,
}

impl Proj4Inverse {
    pub fn for_zone(zone: UtmZone) -> Result<Self> {
        let utm_def = format!("+proj=utm +zone={} +ellps=WGS84 +units=m", zone.number());
        let utm = Proj::from_proj_string(&utm_def)
            .map_err(|e| anyhow::anyhow!("Invalid UTM projection {utm_def:?}: {e:?}"))?;
        let geographic = Proj::from_proj_string("+proj=longlat +ellps=WGS84")
            .map_err(|e| anyhow::anyhow!("Invalid geographic projection: {e:?}"))?;
        Ok(Self { zone, utm, geographic })
    }
}

impl UtmInverse for Proj4Inverse {
    fn to_lat_lon(&self, x: f64, y: f64, zone: UtmZone) -> ffimport_core::Result<LatLon> {
        if zone.number() != self.zone.number() {
            return Err(TileError::Projection(format!(
                "projector bound to zone {} asked for zone {}",
                self.zone.number(),
                zone.number()
            )));
        }
        let mut point = (x, y, 0.0);
        transform(&self.utm, &self.geographic, &mut point)
            .map_err(|e| TileError::Projection(format!("({x}, {y}) in zone {}: {e:?}", zone.number())))?;
        // proj4rs returns geographic coordinates in radians.
        Ok(LatLon::new(point.1.to_degrees(), point.0.to_degrees()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_name_from_pixel_qa_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("LC80440342016259_pixel_qa.tif"), b"").unwrap();
        fs::write(dir.path().join("LC80440342016259.xml"), b"").unwrap();
        assert_eq!(find_scene_name(dir.path()).unwrap(), "LC80440342016259");
    }

    #[test]
    fn scene_name_requires_exactly_one_scene() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_scene_name(dir.path()).is_err());
        fs::write(dir.path().join("a_pixel_qa.tif"), b"").unwrap();
        fs::write(dir.path().join("b_pixel_qa.tif"), b"").unwrap();
        assert!(find_scene_name(dir.path()).is_err());
    }

    const ESPA_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<espa_metadata version="2.0" xmlns="http://espa.cr.usgs.gov/v2">
    <global_metadata>
        <data_provider>USGS/EROS</data_provider>
        <satellite>LANDSAT_8</satellite>
        <instrument>OLI_TIRS</instrument>
        <acquisition_date>2016-09-15</acquisition_date>
        <scene_center_time>18:47:06.5300000Z</scene_center_time>
        <solar_angles zenith="35.2" azimuth="148.9" units="degrees"/>
        <solar_angles zenith="99.0" azimuth="99.0" units="degrees"/>
        <earth_sun_distance>1.0058</earth_sun_distance>
        <projection_information projection="UTM" datum="WGS84" units="meters">
            <corner_point location="UL" x="262200.000000" y="-5103900.000000"/>
            <corner_point location="LR" x="491100.000000" y="-5336100.000000"/>
            <grid_origin>CENTER</grid_origin>
            <utm_proj_params>
                <zone_code>-19</zone_code>
            </utm_proj_params>
        </projection_information>
    </global_metadata>
    <bands>
        <band product="sr_refl" name="sr_band2">
            <percent_coverage>
                <cover type="cloud">99.00</cover>
            </percent_coverage>
        </band>
        <band product="cfmask" name="cfmask">
            <percent_coverage>
                <cover type="cloud">12.31</cover>
                <cover type="water">4.07</cover>
            </percent_coverage>
        </band>
    </bands>
</espa_metadata>
"#;

    #[test]
    fn espa_xml_flattens_to_metadata_keys() {
        let meta = parse_espa_metadata("LC82300902016259", ESPA_XML).unwrap();
        assert_eq!(meta["!scene"], "LC82300902016259");
        assert_eq!(meta["spacecraft"], "LANDSAT_8");
        assert_eq!(meta["sensor_id"], "OLI_TIRS");
        assert_eq!(meta["acquired_date"], "2016-09-15");
        assert_eq!(meta["acquired_time"], "18:47:06.5300000Z");
        assert_eq!(meta["!earth_sun_distance"], "1.0058");
        assert_eq!(meta["!sun_azimuth"], "148.9", "first solar_angles wins");
        assert_eq!(meta["!sun_zenith"], "35.2");
        assert_eq!(meta["!cloud_cover"], "12.31", "only the cfmask band counts");
        assert_eq!(meta["!water_cover"], "4.07");
        assert_eq!(meta["#utm_zone"], "-19");
        assert_eq!(meta["#scene_corner_UL_x"], "262200.000000");
        assert_eq!(meta["#scene_corner_LR_y"], "-5336100.000000");
    }

    #[test]
    fn espa_metadata_feeds_scene_resolution() {
        let meta = parse_espa_metadata("LC8", ESPA_XML).unwrap();
        let scene = ffimport_core::Scene::new("LC8", "/data/LC8", 400, (7631, 7771), meta).unwrap();
        assert!(scene.zone.is_southern());
        assert_eq!(scene.zone.number(), 19);
    }

    #[test]
    fn espa_text_fields_default_to_empty() {
        let xml = r#"<espa_metadata><global_metadata><projection_information>
            <utm_proj_params><zone_code>10</zone_code></utm_proj_params>
        </projection_information></global_metadata></espa_metadata>"#;
        let meta = parse_espa_metadata("LC8", xml).unwrap();
        assert_eq!(meta["spacecraft"], "");
        assert_eq!(meta["acquired_time"], "");
        assert!(!meta.contains_key("!earth_sun_distance"));
        assert!(!meta.contains_key("!cloud_cover"));
    }

    #[test]
    fn espa_without_zone_code_is_refused() {
        let xml = "<espa_metadata><global_metadata><satellite>LANDSAT_8</satellite></global_metadata></espa_metadata>";
        let err = parse_espa_metadata("LC8", xml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TileError>(),
            Some(TileError::MissingMetadata { key }) if key == KEY_UTM_ZONE
        ));
    }

    #[test]
    fn espa_metadata_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LC8.xml");
        fs::write(&path, ESPA_XML).unwrap();
        assert_eq!(load_espa_metadata(&path, "LC8").unwrap()["#utm_zone"], "-19");
        assert!(load_espa_metadata(&dir.path().join("missing.xml"), "LC8").is_err());
    }

    #[test]
    fn list_tiles_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["tile_0002.png", "tile_0000.png", "render.png", "tile_0001.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(list_tiles(dir.path(), "png").unwrap(), vec!["tile_0000.png", "tile_0002.png"]);
    }

    #[test]
    fn png_stats_are_percent_scaled() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("land")).unwrap();
        let mut img = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::new(2, 1);
        img.put_pixel(0, 0, image::Luma([0]));
        img.put_pixel(1, 0, image::Luma([65535]));
        img.save(dir.path().join("land/tile_0000.png")).unwrap();

        let stats = PngMaskStats::new(dir.path()).stats(Channel::Land, "tile_0000.png").unwrap();
        assert!((stats.max - 100.0).abs() < 1e-9);
        assert!((stats.mean - 50.0).abs() < 1e-6);
    }

    #[test]
    fn missing_mask_tile_is_invalid_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let err = PngMaskStats::new(dir.path()).stats(Channel::Cloud, "tile_0000.png").unwrap_err();
        assert!(matches!(err, TileError::InvalidStatistics { channel: Channel::Cloud, .. }));
    }

    #[test]
    fn tile_dimensions_come_from_png_header() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(120, 80).save(dir.path().join("tile_0003.png")).unwrap();
        assert_eq!(PngTileSizer::new(dir.path()).dimensions("tile_0003.png").unwrap(), (120, 80));
    }

    #[test]
    fn proj4_inverse_lands_near_zone_meridian() {
        // Zone 10 central meridian is -123°; the equator at the false easting.
        let proj = Proj4Inverse::for_zone(UtmZone(10)).unwrap();
        let ll = proj.to_lat_lon(500_000.0, 0.0, UtmZone(10)).unwrap();
        assert!(ll.lat.abs() < 1e-6, "lat {}", ll.lat);
        assert!((ll.lon + 123.0).abs() < 1e-6, "lon {}", ll.lon);
    }

    #[test]
    fn proj4_inverse_rejects_other_zone() {
        let proj = Proj4Inverse::for_zone(UtmZone(10)).unwrap();
        assert!(proj.to_lat_lon(500_000.0, 0.0, UtmZone(11)).is_err());
    }
}
