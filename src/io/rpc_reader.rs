use crate::core::rpc::{
    DirectFunctions, InverseFunctions, Normalization, RationalFunction, Rpc, RpcParams, NB_COEFFS,
};
use crate::types::{GeoError, GeoResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Default pixel convention of the readers: [0, 0] is the centre of the upper-left pixel
pub const DEFAULT_TOP_LEFT_CONVENTION: bool = false;

/// Loader of RPC models from DIMAP, OSSIM keyword list and Euclidium files
pub struct RpcReader;

/// Object type declared by a Euclidium file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EuclidiumKind {
    Inverse,
    Direct,
}

/// Content of a Euclidium coefficient file
#[derive(Debug, Clone)]
pub struct EuclidiumFile {
    pub kind: EuclidiumKind,
    pub coeff_px: Vec<f64>,
    pub coeff_qx: Vec<f64>,
    pub coeff_py: Vec<f64>,
    pub coeff_qy: Vec<f64>,
    /// Normalisation per axis: "X" (lon), "Y" (lat), "COL", "LIG" (row), "ALT"
    pub normalisation: BTreeMap<&'static str, Normalization>,
}

/// Values of interest gathered from a DIMAP document
#[derive(Debug, Default)]
struct DimapContent {
    metadata_format: Option<String>,
    profile_version: Option<String>,
    functions: HashMap<String, Vec<f64>>,
    validity: HashMap<(String, String), f64>,
}

const RFM_FUNCTIONS: [&str; 4] = ["F_LON", "F_LAT", "F_COL", "F_ROW"];
const RFM_AXES: [&str; 5] = ["Lon", "Lat", "Alt", "Col", "Row"];

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn first_attribute_value(e: &BytesStart<'_>) -> GeoResult<Option<String>> {
    match e.attributes().next() {
        Some(Ok(attr)) => {
            let value = attr
                .unescape_value()
                .map_err(|err| GeoError::XmlParsing(format!("Invalid attribute: {}", err)))?;
            Ok(Some(value.to_string()))
        }
        Some(Err(err)) => Err(GeoError::XmlParsing(format!("Invalid attribute: {}", err))),
        None => Ok(None),
    }
}

fn parse_numbers(text: &str, what: &str) -> GeoResult<Vec<f64>> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                GeoError::InvalidFormat(format!("Invalid number '{}' in {}", token, what))
            })
        })
        .collect()
}

/// Walk a DIMAP document and keep the first occurrence of each RPC field
fn scan_dimap(xml_content: &str) -> GeoResult<DimapContent> {
    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(true);

    let mut content = DimapContent::default();
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e);
                if name == "METADATA_PROFILE"
                    && content.profile_version.is_none()
                    && stack.iter().any(|s| s == "Metadata_Identification")
                {
                    content.profile_version = first_attribute_value(e)?;
                }
                stack.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                if element_name(e) == "METADATA_PROFILE"
                    && content.profile_version.is_none()
                    && stack.iter().any(|s| s == "Metadata_Identification")
                {
                    content.profile_version = first_attribute_value(e)?;
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| GeoError::XmlParsing(err.to_string()))?;
                content.record_text(&stack, &text)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GeoError::XmlParsing(format!(
                    "Error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(content)
}

impl DimapContent {
    fn record_text(&mut self, stack: &[String], text: &str) -> GeoResult<()> {
        let Some(current) = stack.last() else {
            return Ok(());
        };
        let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());
        let within = |name: &str| stack.iter().any(|s| s == name);

        if current == "METADATA_FORMAT" && self.metadata_format.is_none() && within("Metadata_Identification") {
            self.metadata_format = Some(text.trim().to_string());
        } else if RFM_FUNCTIONS.contains(&current.as_str())
            && within("Global_RFM")
            && !self.functions.contains_key(current)
        {
            let values = parse_numbers(text, current)?;
            self.functions.insert(current.clone(), values);
        } else if (current == "A" || current == "B") && within("RFM_Validity") {
            if let Some(axis) = parent.filter(|p| RFM_AXES.contains(p)) {
                let key = (axis.to_string(), current.clone());
                if !self.validity.contains_key(&key) {
                    let value = text.trim().parse::<f64>().map_err(|_| {
                        GeoError::InvalidFormat(format!("Invalid {}/{} value '{}'", axis, current, text))
                    })?;
                    self.validity.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn function(&self, name: &str) -> GeoResult<RationalFunction> {
        let coeffs = self
            .functions
            .get(name)
            .ok_or_else(|| GeoError::InvalidFormat(format!("Missing Global_RFM/{}", name)))?;
        RationalFunction::from_coefficients(coeffs)
    }

    /// Validity domain of an axis: A is the scale, B the offset
    fn normalization(&self, axis: &str) -> GeoResult<Normalization> {
        let get = |field: &str| {
            self.validity
                .get(&(axis.to_string(), field.to_string()))
                .copied()
                .ok_or_else(|| {
                    GeoError::InvalidFormat(format!("Missing RFM_Validity/{}/{}", axis, field))
                })
        };
        Ok(Normalization::new(get("B")?, get("A")?))
    }
}

fn has_xml_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

fn read_keyword_list(path: &Path) -> GeoResult<HashMap<String, String>> {
    parse_keyword_list(&std::fs::read_to_string(path)?)
}

/// Every line must read `key: value`
fn parse_keyword_list(content: &str) -> GeoResult<HashMap<String, String>> {
    content
        .lines()
        .map(|line| {
            line.split_once(": ")
                .map(|(key, value)| (key.trim().to_string(), value.trim_end().to_string()))
                .ok_or_else(|| GeoError::InvalidFormat(format!("Invalid keyword list line '{}'", line)))
        })
        .collect()
}

fn keyword_value(keywords: &HashMap<String, String>, key: &str) -> GeoResult<f64> {
    let raw = keywords
        .get(key)
        .ok_or_else(|| GeoError::InvalidFormat(format!("Missing keyword '{}'", key)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| GeoError::InvalidFormat(format!("Invalid value '{}' for keyword '{}'", raw, key)))
}

fn euclidium_block(lines: &[&str], name: &str) -> GeoResult<Vec<f64>> {
    let header = format!(">>\tCOEFF POLYNOME {}", name);
    let start = lines
        .iter()
        .position(|line| *line == header)
        .ok_or_else(|| GeoError::InvalidFormat(format!("Missing {} block", name)))?;

    let block = lines.get(start + 1..start + 1 + NB_COEFFS).ok_or_else(|| {
        GeoError::InvalidFormat(format!("{} block has less than {} coefficients", name, NB_COEFFS))
    })?;

    block
        .iter()
        .map(|line| {
            line.split_whitespace()
                .nth(1)
                .and_then(|token| token.parse::<f64>().ok())
                .ok_or_else(|| {
                    GeoError::InvalidFormat(format!("Invalid {} coefficient line '{}'", name, line))
                })
        })
        .collect()
}

impl RpcReader {
    /// DIMAP version of a file, `None` when it is not a DIMAP document
    pub fn identify_dimap<P: AsRef<Path>>(path: P) -> Option<String> {
        let xml_content = std::fs::read_to_string(path.as_ref()).ok()?;
        let content = scan_dimap(&xml_content).ok()?;
        log::debug!(
            "{}: metadata format {:?}, profile version {:?}",
            path.as_ref().display(),
            content.metadata_format,
            content.profile_version
        );
        content.profile_version
    }

    /// OSSIM model type of a keyword list file, `None` when it is not one
    pub fn identify_ossim_kwl<P: AsRef<Path>>(path: P) -> Option<String> {
        let keywords = read_keyword_list(path.as_ref()).ok()?;
        keywords
            .get("type")
            .map(|t| t.trim())
            .filter(|t| t.starts_with("ossim"))
            .map(str::to_string)
    }

    /// Parse a Euclidium coefficient file
    pub fn read_euclidium_file<P: AsRef<Path>>(path: P) -> GeoResult<EuclidiumFile> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let lines: Vec<&str> = content.lines().map(str::trim_end).collect();

        let kind = lines
            .iter()
            .filter(|line| line.starts_with(">>\tTYPE_OBJET"))
            .filter_map(|line| line.split_whitespace().last())
            .find_map(|last| {
                if last.ends_with("Inverse") {
                    Some(EuclidiumKind::Inverse)
                } else if last.ends_with("Directe") {
                    Some(EuclidiumKind::Direct)
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                GeoError::InvalidFormat(format!(
                    "{}: missing or unknown TYPE_OBJET",
                    path.as_ref().display()
                ))
            })?;

        let mut normalisation = BTreeMap::new();
        for line in lines.iter().filter(|line| line.starts_with(">>\t")) {
            let axis = match (line.split_whitespace().nth(1), kind) {
                (Some("XIN_OFFSET"), EuclidiumKind::Inverse) => "X",
                (Some("XIN_OFFSET"), EuclidiumKind::Direct) => "COL",
                (Some("YIN_OFFSET"), EuclidiumKind::Inverse) => "Y",
                (Some("YIN_OFFSET"), EuclidiumKind::Direct) => "LIG",
                (Some("ZIN_OFFSET"), _) => "ALT",
                (Some("XOUT_OFFSET"), EuclidiumKind::Inverse) => "COL",
                (Some("XOUT_OFFSET"), EuclidiumKind::Direct) => "X",
                (Some("YOUT_OFFSET"), EuclidiumKind::Inverse) => "LIG",
                (Some("YOUT_OFFSET"), EuclidiumKind::Direct) => "Y",
                _ => continue,
            };
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let parse = |i: usize| {
                tokens
                    .get(i)
                    .and_then(|token| token.parse::<f64>().ok())
                    .ok_or_else(|| GeoError::InvalidFormat(format!("Invalid normalisation line '{}'", line)))
            };
            normalisation.insert(axis, Normalization::new(parse(4)?, parse(5)?));
        }

        Ok(EuclidiumFile {
            kind,
            coeff_px: euclidium_block(&lines, "PXOUT")?,
            coeff_qx: euclidium_block(&lines, "QXOUT")?,
            coeff_py: euclidium_block(&lines, "PYOUT")?,
            coeff_qy: euclidium_block(&lines, "QYOUT")?,
            normalisation,
        })
    }

    /// Load a DIMAP v1 RPC file
    ///
    /// With `top_left_convention`, [0, 0] is the corner of the top-left pixel
    /// (OSSIM) instead of its centre.
    pub fn from_dimap_v1<P: AsRef<Path>>(path: P, top_left_convention: bool) -> GeoResult<Rpc> {
        let path = path.as_ref();
        log::info!("Reading DIMAP RPC from: {}", path.display());

        if !has_xml_extension(path) {
            return Err(GeoError::InvalidFormat(format!(
                "DIMAP file must have an XML extension: {}",
                path.display()
            )));
        }

        let xml_content = std::fs::read_to_string(path)?;
        let content = scan_dimap(&xml_content)?;
        let version = content.profile_version.clone().ok_or_else(|| {
            GeoError::InvalidFormat(format!("{}: no METADATA_PROFILE version", path.display()))
        })?;

        let mut params = RpcParams {
            driver_type: format!("dimap_v{}", version),
            col: content.normalization("Col")?,
            row: content.normalization("Row")?,
            alt: content.normalization("Alt")?,
            lon: content.normalization("Lon")?,
            lat: content.normalization("Lat")?,
            direct: Some(DirectFunctions {
                lon: content.function("F_LON")?,
                lat: content.function("F_LAT")?,
            }),
            inverse: Some(InverseFunctions {
                col: content.function("F_COL")?,
                row: content.function("F_ROW")?,
            }),
        };
        if top_left_convention {
            params.shift_to_top_left();
        }
        Rpc::new(params)
    }

    /// Load an OSSIM keyword list (inverse coefficients only)
    pub fn from_ossim_kwl<P: AsRef<Path>>(path: P, top_left_convention: bool) -> GeoResult<Rpc> {
        let path = path.as_ref();
        log::info!("Reading OSSIM keyword list from: {}", path.display());

        let keywords = read_keyword_list(path)?;
        let coefficients = |axis: &str, part: &str| -> GeoResult<Vec<f64>> {
            (0..NB_COEFFS)
                .map(|i| keyword_value(&keywords, &format!("{}_{}_coeff_{:02}", axis, part, i)))
                .collect()
        };

        let col = RationalFunction::from_slices(&coefficients("samp", "num")?, &coefficients("samp", "den")?)?;
        let row = RationalFunction::from_slices(&coefficients("line", "num")?, &coefficients("line", "den")?)?;

        let mut params = RpcParams {
            driver_type: "ossim_kwl".to_string(),
            col: Normalization::new(
                keyword_value(&keywords, "samp_off")?,
                keyword_value(&keywords, "samp_scale")?,
            ),
            row: Normalization::new(
                keyword_value(&keywords, "line_off")?,
                keyword_value(&keywords, "line_scale")?,
            ),
            alt: Normalization::new(
                keyword_value(&keywords, "height_off")?,
                keyword_value(&keywords, "height_scale")?,
            ),
            lon: Normalization::new(
                keyword_value(&keywords, "long_off")?,
                keyword_value(&keywords, "long_scale")?,
            ),
            lat: Normalization::new(
                keyword_value(&keywords, "lat_off")?,
                keyword_value(&keywords, "lat_scale")?,
            ),
            direct: None,
            inverse: Some(InverseFunctions { col, row }),
        };
        if top_left_convention {
            params.shift_to_top_left();
        }
        Rpc::new(params)
    }

    /// Load Euclidium inverse coefficients, and direct ones when given
    pub fn from_euclidium<P: AsRef<Path>>(
        inverse_path: P,
        direct_path: Option<&Path>,
        top_left_convention: bool,
    ) -> GeoResult<Rpc> {
        log::info!("Reading Euclidium RPC from: {}", inverse_path.as_ref().display());

        let inverse_file = Self::read_euclidium_file(inverse_path.as_ref())?;
        if inverse_file.kind != EuclidiumKind::Inverse {
            log::warn!(
                "Inverse Euclidium file {} is of {:?} type",
                inverse_path.as_ref().display(),
                inverse_file.kind
            );
        }

        let norm = |axis: &str| {
            inverse_file.normalisation.get(axis).copied().ok_or_else(|| {
                GeoError::InvalidFormat(format!("Missing {} normalisation in Euclidium file", axis))
            })
        };

        let direct = match direct_path {
            Some(path) => {
                let direct_file = Self::read_euclidium_file(path)?;
                if direct_file.kind != EuclidiumKind::Direct {
                    log::warn!("Direct Euclidium file {} is of {:?} type", path.display(), direct_file.kind);
                }
                for (axis, value) in &inverse_file.normalisation {
                    if direct_file.normalisation.get(axis) != Some(value) {
                        log::warn!(
                            "Normalisation coefficients differ between direct and inverse files: {} : {:?} {:?}",
                            axis,
                            value,
                            direct_file.normalisation.get(axis)
                        );
                    }
                }
                Some(DirectFunctions {
                    lon: RationalFunction::from_slices(&direct_file.coeff_px, &direct_file.coeff_qx)?,
                    lat: RationalFunction::from_slices(&direct_file.coeff_py, &direct_file.coeff_qy)?,
                })
            }
            None => None,
        };

        let mut params = RpcParams {
            driver_type: "euclidium".to_string(),
            col: norm("COL")?,
            row: norm("LIG")?,
            alt: norm("ALT")?,
            lon: norm("X")?,
            lat: norm("Y")?,
            direct,
            inverse: Some(InverseFunctions {
                col: RationalFunction::from_slices(&inverse_file.coeff_px, &inverse_file.coeff_qx)?,
                row: RationalFunction::from_slices(&inverse_file.coeff_py, &inverse_file.coeff_qy)?,
            }),
        };
        if top_left_convention {
            params.shift_to_top_left();
        }
        Rpc::new(params)
    }

    /// Load an RPC model whatever its format
    ///
    /// `secondary` is the direct coefficient file of a Euclidium pair.
    pub fn from_any<P: AsRef<Path>>(
        primary: P,
        secondary: Option<&Path>,
        top_left_convention: bool,
    ) -> GeoResult<Rpc> {
        let primary = primary.as_ref();

        if has_xml_extension(primary) {
            if let Some(version) = Self::identify_dimap(primary) {
                let number: f64 = version.trim().parse().map_err(|_| {
                    GeoError::InvalidFormat(format!("Unreadable DIMAP version '{}'", version))
                })?;
                if number < 2.0 {
                    return Self::from_dimap_v1(primary, top_left_convention);
                }
                return Err(GeoError::InvalidFormat(format!(
                    "DIMAP version {} is not supported",
                    version
                )));
            }
        } else if let Some(model) = Self::identify_ossim_kwl(primary) {
            log::debug!("{} is an OSSIM {} keyword list", primary.display(), model);
            return Self::from_ossim_kwl(primary, top_left_convention);
        }

        Self::from_euclidium(primary, secondary, top_left_convention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_dimap_first_occurrences() {
        let xml = r#"<Dimap_Document>
            <Metadata_Identification>
                <METADATA_FORMAT version="1.0">DIMAP_PHR</METADATA_FORMAT>
                <METADATA_PROFILE version="1.0">PHR_SENSOR</METADATA_PROFILE>
            </Metadata_Identification>
            <Rational_Function_Model>
                <Global_RFM>
                    <F_LON>1 2 3</F_LON>
                </Global_RFM>
                <RFM_Validity>
                    <Direct_Model_Validity_Domain>
                        <Lon><A>0.5</A><B>7.25</B></Lon>
                    </Direct_Model_Validity_Domain>
                    <Lon><A>9.0</A><B>9.0</B></Lon>
                </RFM_Validity>
            </Rational_Function_Model>
        </Dimap_Document>"#;

        let content = scan_dimap(xml).unwrap();
        assert_eq!(content.metadata_format.as_deref(), Some("DIMAP_PHR"));
        assert_eq!(content.profile_version.as_deref(), Some("1.0"));
        assert_eq!(content.functions["F_LON"], vec![1.0, 2.0, 3.0]);
        let lon = content.normalization("Lon").unwrap();
        assert_eq!(lon, Normalization::new(7.25, 0.5));
        assert!(content.normalization("Lat").is_err());
        // 3 values cannot make a rational function
        assert!(content.function("F_LON").is_err());
    }

    #[test]
    fn test_scan_dimap_rejects_bad_numbers() {
        let xml = "<Dimap_Document><Global_RFM><F_COL>1 x 3</F_COL></Global_RFM></Dimap_Document>";
        assert!(matches!(scan_dimap(xml), Err(GeoError::InvalidFormat(_))));
    }

    #[test]
    fn test_keyword_list_lines() {
        let keywords = parse_keyword_list("type: ossimPleiadesModel\nlat_off: 43.5  \n").unwrap();
        assert_eq!(keywords["type"], "ossimPleiadesModel");
        assert_eq!(keywords["lat_off"], "43.5");

        assert!(matches!(
            parse_keyword_list("type: ossimPleiadesModel\nno separator\n"),
            Err(GeoError::InvalidFormat(_))
        ));
        assert!(parse_keyword_list("type: ossimPleiadesModel\n\nlat_off: 1\n").is_err());
    }

    #[test]
    fn test_xml_extension() {
        assert!(has_xml_extension(Path::new("RPC_PHR1A_P_201309231105393_SEN_756965101-001.XML")));
        assert!(has_xml_extension(Path::new("rpc.xml")));
        assert!(!has_xml_extension(Path::new("rpc.geom")));
    }
}
