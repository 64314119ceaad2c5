//! 队列身高体重范围聚合
//!
//! 增量更新与全量重算使用同一个折叠函数，结果与患者加入顺序无关。

use crate::models::{CohortDimensions, DimensionRange};
use bson::{Bson, Document};

impl DimensionRange {
    /// 折叠一个值，缺失值不影响区间
    pub fn include(&mut self, value: Option<f64>) {
        let Some(v) = value.filter(|v| !v.is_nan()) else {
            return;
        };
        self.min = Some(self.min.map_or(v, |min| min.min(v)));
        self.max = Some(self.max.map_or(v, |max| max.max(v)));
    }
}

impl CohortDimensions {
    pub fn include(&mut self, height: Option<f64>, weight: Option<f64>) {
        self.height.include(height);
        self.weight.include(weight);
    }

    /// 从空区间开始全量计算
    pub fn from_members<I>(members: I) -> Self
    where
        I: IntoIterator<Item = (Option<f64>, Option<f64>)>,
    {
        let mut dimensions = CohortDimensions::default();
        for (height, weight) in members {
            dimensions.include(height, weight);
        }
        dimensions
    }

    /// 生成 `$set` 字段，未知值写为 null
    pub fn to_set_document(&self) -> Document {
        let as_bson = |v: Option<f64>| v.map(Bson::Double).unwrap_or(Bson::Null);
        let mut set = Document::new();
        set.insert("height.min", as_bson(self.height.min));
        set.insert("height.max", as_bson(self.height.max));
        set.insert("weight.min", as_bson(self.weight.min));
        set.insert("weight.max", as_bson(self.weight.max));
        set
    }
}
