//! 通用工具函数

use crate::error::{CardioError, Result};
use crate::models::Landmark;
use bson::{Bson, Document};
use std::path::Path;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 计算体重指数 (BMI)，体重单位 kg，身高单位 cm
pub fn calculate_bmi(weight: Option<f64>, height: Option<f64>) -> Option<f64> {
    let (weight, height) = (weight?, height?);
    let bmi = round2(weight / (height / 100.0).powi(2));
    bmi.is_finite().then_some(bmi)
}

/// 按 Mosteller 公式计算体表面积 (BSA) [m²]，体重单位 kg，身高单位 cm
pub fn calculate_mosteller_bsa(weight: Option<f64>, height: Option<f64>) -> Option<f64> {
    let (weight, height) = (weight?, height?);
    let bsa = round2((weight * height / 3600.0).sqrt());
    bsa.is_finite().then_some(bsa)
}

/// 解析 fcsv 标志点文件内容
///
/// 以数字开头的行为坐标点，第 1-3 列为 x, y, z。
pub fn parse_fcsv(content: &str) -> Result<Vec<[f64; 3]>> {
    let mut points = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let columns: Vec<&str> = line.split(',').collect();
        if columns.len() < 4 {
            return Err(CardioError::Validation(format!(
                "fcsv line {}: expected at least 4 columns",
                line_no + 1
            )));
        }
        let mut point = [0.0; 3];
        for (slot, raw) in point.iter_mut().zip(&columns[1..4]) {
            *slot = raw.trim().parse::<f64>().map_err(|e| {
                CardioError::Validation(format!("fcsv line {}: {}", line_no + 1, e))
            })?;
        }
        points.push(point);
    }
    Ok(points)
}

/// 读取 fcsv 文件
pub fn read_fcsv(path: &Path) -> Result<Vec<[f64; 3]>> {
    if !path.exists() {
        return Err(CardioError::MissingFile(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_fcsv(&content)
}

impl Landmark {
    /// 从 fcsv 文件构造标志点
    pub fn from_fcsv(
        path: &Path,
        name: &str,
        description: &str,
        type_of_spline: &str,
    ) -> Result<Self> {
        Ok(Landmark {
            name: name.to_string(),
            value: read_fcsv(path)?,
            description: description.to_string(),
            type_of_spline: type_of_spline.to_string(),
        })
    }
}

/// 文档格式化输出，用于日志
pub fn pretty_documents(docs: &[Document]) -> String {
    let value = Bson::Array(docs.iter().cloned().map(Bson::Document).collect())
        .into_relaxed_extjson();
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| format!("{:?}", docs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FCSV: &str = "# Markups fiducial file version = 4.11\n\
# CoordinateSystem = LPS\n\
# columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID\n\
1,84.69594,-32.78431,484.6335,0,0,0,1,1,1,0,F-1,,\n";

    #[test]
    fn test_calculate_bmi() {
        assert_eq!(calculate_bmi(Some(93.0), Some(200.0)), Some(23.25));
        assert_eq!(calculate_bmi(None, Some(200.0)), None);
        assert_eq!(calculate_bmi(Some(93.0), Some(0.0)), None);
    }

    #[test]
    fn test_calculate_mosteller_bsa() {
        assert_eq!(calculate_mosteller_bsa(Some(93.0), Some(200.0)), Some(2.27));
        assert_eq!(calculate_mosteller_bsa(Some(93.0), None), None);
        assert_eq!(calculate_mosteller_bsa(Some(-1.0), Some(10.0)), None);
    }

    #[test]
    fn test_parse_fcsv() {
        let points = parse_fcsv(FCSV).unwrap();
        assert_eq!(points, vec![[84.69594, -32.78431, 484.6335]]);

        assert!(parse_fcsv("1,2.0,3.0\n").is_err());
        assert!(parse_fcsv("1,a,b,c\n").is_err());
        assert!(parse_fcsv("# only comments\n").unwrap().is_empty());
    }

    #[test]
    fn test_read_fcsv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FCSV.as_bytes()).unwrap();
        assert_eq!(read_fcsv(file.path()).unwrap().len(), 1);

        let landmark = Landmark::from_fcsv(file.path(), "LV Apex", "LV Apex", "marker_point").unwrap();
        assert_eq!(landmark.value, vec![[84.69594, -32.78431, 484.6335]]);
        assert_eq!(landmark.type_of_spline, "marker_point");

        let missing = Path::new("/nonexistent/landmarks.fcsv");
        assert!(matches!(read_fcsv(missing), Err(CardioError::MissingFile(_))));
    }

    #[test]
    fn test_pretty_documents() {
        let out = pretty_documents(&[bson::doc! { "age": 46 }]);
        assert!(out.contains("\"age\": 46"));
    }
}
