#![allow(dead_code)]

use shareloc::core::rpc::{
    DirectFunctions, InverseFunctions, Normalization, RationalFunction, RpcParams, NB_COEFFS,
};
use shareloc::Rpc;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Rational function with a unit denominator and the given numerator terms
pub fn linear(terms: &[(usize, f64)]) -> RationalFunction {
    let mut numerator = [0.0; NB_COEFFS];
    for &(i, c) in terms {
        numerator[i] = c;
    }
    let mut denominator = [0.0; NB_COEFFS];
    denominator[0] = 1.0;
    RationalFunction::new(numerator, denominator)
}

/// 10000x10000 pixel north-up sensor around (7E, 43N) whose columns drift with altitude
pub fn scene_params() -> RpcParams {
    RpcParams {
        driver_type: "synthetic".to_string(),
        col: Normalization::new(5000.0, 5000.0),
        row: Normalization::new(5000.0, 5000.0),
        alt: Normalization::new(500.0, 1000.0),
        lon: Normalization::new(7.0, 0.1),
        lat: Normalization::new(43.0, 0.1),
        direct: Some(DirectFunctions {
            lon: linear(&[(1, 1.0), (3, -0.1)]),
            lat: linear(&[(2, -1.0)]),
        }),
        inverse: Some(InverseFunctions {
            col: linear(&[(1, 1.0), (3, 0.1)]),
            row: linear(&[(2, -1.0)]),
        }),
    }
}

pub fn scene_rpc() -> Rpc {
    Rpc::new(scene_params()).unwrap()
}

/// 100x100 pixel stereo pair around (7E, 43N); altitude shifts columns in opposite directions
pub fn stereo_pair() -> (Rpc, Rpc) {
    let build = |drift: f64| {
        Rpc::new(RpcParams {
            driver_type: "synthetic".to_string(),
            col: Normalization::new(50.0, 50.0),
            row: Normalization::new(50.0, 50.0),
            alt: Normalization::new(0.0, 1000.0),
            lon: Normalization::new(7.0, 0.01),
            lat: Normalization::new(43.0, 0.01),
            direct: Some(DirectFunctions {
                lon: linear(&[(1, 1.0), (3, -drift)]),
                lat: linear(&[(2, -1.0)]),
            }),
            inverse: Some(InverseFunctions {
                col: linear(&[(1, 1.0), (3, drift)]),
                row: linear(&[(2, -1.0)]),
            }),
        })
        .unwrap()
    };
    (build(0.1), build(-0.1))
}

fn join(values: impl IntoIterator<Item = f64>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn rfm(function: &RationalFunction) -> String {
    join(function.numerator.iter().chain(function.denominator.iter()).copied())
}

/// DIMAP v1 RPC document holding `params`
pub fn dimap_document(params: &RpcParams, profile_version: &str) -> String {
    let direct = params.direct.as_ref().unwrap();
    let inverse = params.inverse.as_ref().unwrap();
    let validity = |name: &str, norm: &Normalization| {
        format!("<{0}><A>{1}</A><B>{2}</B></{0}>", name, norm.scale, norm.offset)
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Dimap_Document name="RPC_TEST.XML">
  <Metadata_Identification>
    <METADATA_FORMAT version="{version}">DIMAP_PHR</METADATA_FORMAT>
    <METADATA_PROFILE version="{version}">PHR_SENSOR</METADATA_PROFILE>
  </Metadata_Identification>
  <Rational_Function_Model>
    <Global_RFM>
      <F_ROW>{f_row}</F_ROW>
      <F_COL>{f_col}</F_COL>
      <F_LON>{f_lon}</F_LON>
      <F_LAT>{f_lat}</F_LAT>
    </Global_RFM>
    <RFM_Validity>
      {lon}
      {lat}
      {alt}
      {col}
      {row}
    </RFM_Validity>
  </Rational_Function_Model>
</Dimap_Document>
"#,
        version = profile_version,
        f_row = rfm(&inverse.row),
        f_col = rfm(&inverse.col),
        f_lon = rfm(&direct.lon),
        f_lat = rfm(&direct.lat),
        lon = validity("Lon", &params.lon),
        lat = validity("Lat", &params.lat),
        alt = validity("Alt", &params.alt),
        col = validity("Col", &params.col),
        row = validity("Row", &params.row),
    )
}

/// OSSIM keyword list with the inverse coefficients of `params`
pub fn ossim_keyword_list(params: &RpcParams) -> String {
    let inverse = params.inverse.as_ref().unwrap();
    let mut kwl = String::from("type: ossimPleiadesModel\npolynomial_format: B\n");
    for (key, norm) in [
        ("samp", &params.col),
        ("line", &params.row),
        ("height", &params.alt),
        ("long", &params.lon),
        ("lat", &params.lat),
    ] {
        writeln!(kwl, "{}_off: {}", key, norm.offset).unwrap();
        writeln!(kwl, "{}_scale: {}", key, norm.scale).unwrap();
    }
    for (axis, function) in [("samp", &inverse.col), ("line", &inverse.row)] {
        for i in 0..NB_COEFFS {
            writeln!(kwl, "{}_num_coeff_{:02}: {}", axis, i, function.numerator[i]).unwrap();
        }
        for i in 0..NB_COEFFS {
            writeln!(kwl, "{}_den_coeff_{:02}: {}", axis, i, function.denominator[i]).unwrap();
        }
    }
    kwl
}

/// Euclidium coefficient file; `inverse` selects the inverse or direct set
pub fn euclidium_file(params: &RpcParams, inverse: bool) -> String {
    let (kind, x, y, inputs, outputs) = if inverse {
        let f = params.inverse.as_ref().unwrap();
        (
            "Fonction_rationnelle_Inverse",
            &f.col,
            &f.row,
            [("XIN", &params.lon), ("YIN", &params.lat)],
            [("XOUT", &params.col), ("YOUT", &params.row)],
        )
    } else {
        let f = params.direct.as_ref().unwrap();
        (
            "Fonction_rationnelle_Directe",
            &f.lon,
            &f.lat,
            [("XIN", &params.col), ("YIN", &params.row)],
            [("XOUT", &params.lon), ("YOUT", &params.lat)],
        )
    };

    let mut text = String::new();
    writeln!(text, ">>\tTYPE_OBJET : {}", kind).unwrap();
    for (name, norm) in inputs
        .iter()
        .chain([("ZIN", &params.alt)].iter())
        .chain(outputs.iter())
    {
        writeln!(text, ">>\t{}_OFFSET : unit {} {}", name, norm.offset, norm.scale).unwrap();
    }
    for (name, values) in [
        ("PXOUT", &x.numerator),
        ("QXOUT", &x.denominator),
        ("PYOUT", &y.numerator),
        ("QYOUT", &y.denominator),
    ] {
        writeln!(text, ">>\tCOEFF POLYNOME {}", name).unwrap();
        for (i, v) in values.iter().enumerate() {
            writeln!(text, "{}\t{}", i, v).unwrap();
        }
    }
    text
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
