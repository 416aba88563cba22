//! 结果表的 CSV 落盘.
//!
//! 单对结果表的列为 `label,name,<指标列...>`; 汇总表在其前面加上 `subject,model` 两列.
//! NaN 写为空字段.

use std::fs::File;
use std::io;
use std::path::Path;

use crate::metrics::{MetricKind, MetricRows};

const DICE_HEADER: [&str; 3] = ["label", "name", "dice"];

const DISTANCE_HEADER: [&str; 9] = [
    "label",
    "name",
    "n_voxels_ref",
    "n_voxels_pred",
    "n_surface_voxels_ref",
    "n_surface_voxels_pred",
    "hd50_mm",
    "hd95_mm",
    "hdmax_mm",
];

const COMBINED_PREFIX: [&str; 2] = ["subject", "model"];

/// 指定度量的单对结果表表头.
pub fn header(kind: MetricKind) -> &'static [&'static str] {
    match kind {
        MetricKind::Dice => &DICE_HEADER,
        MetricKind::SurfaceDistance => &DISTANCE_HEADER,
    }
}

/// 按 `decimals` 位小数格式化浮点值. NaN 与无穷写为空字段.
pub fn format_value(v: f64, decimals: Option<u32>) -> String {
    if !v.is_finite() {
        return String::new();
    }
    match decimals {
        Some(d) => format!("{:.*}", d as usize, v),
        None => v.to_string(),
    }
}

/// 将结果行转换为 CSV 记录, 顺序与 [`header`] 一致.
pub fn records(rows: &MetricRows, decimals: Option<u32>) -> Vec<Vec<String>> {
    match rows {
        MetricRows::Dice(rows) => rows
            .iter()
            .map(|r| {
                vec![
                    r.label.to_string(),
                    r.name.clone(),
                    format_value(r.dice, decimals),
                ]
            })
            .collect(),
        MetricRows::Distance(rows) => rows
            .iter()
            .map(|r| {
                vec![
                    r.label.to_string(),
                    r.name.clone(),
                    r.n_voxels_ref.to_string(),
                    r.n_voxels_pred.to_string(),
                    r.n_surface_voxels_ref.to_string(),
                    r.n_surface_voxels_pred.to_string(),
                    format_value(r.hd50_mm, decimals),
                    format_value(r.hd95_mm, decimals),
                    format_value(r.hdmax_mm, decimals),
                ]
            })
            .collect(),
    }
}

/// 将单对结果表写入 `writer`. 没有任何行时只写表头.
pub fn write_table<W: io::Write>(
    writer: W,
    rows: &MetricRows,
    decimals: Option<u32>,
) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(header(rows.kind()))?;
    for rec in records(rows, decimals) {
        wtr.write_record(&rec)?;
    }
    wtr.flush()?;
    Ok(())
}

/// 将单对结果表保存到 `path`.
pub fn save_table<P: AsRef<Path>>(
    path: P,
    rows: &MetricRows,
    decimals: Option<u32>,
) -> csv::Result<()> {
    write_table(File::create(path)?, rows, decimals)
}

/// 将多对结果合并写入 `writer`, 每行前加上受试者 ID 与模型名.
///
/// # 注意
///
/// `tables` 中所有结果必须属于 `kind` 指定的度量, 否则列数不一致, 写入会失败.
pub fn write_combined<'a, W, I>(
    writer: W,
    kind: MetricKind,
    model: &str,
    tables: I,
    decimals: Option<u32>,
) -> csv::Result<()>
where
    W: io::Write,
    I: IntoIterator<Item = (&'a str, &'a MetricRows)>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(COMBINED_PREFIX.iter().chain(header(kind)))?;
    for (subject, rows) in tables {
        for rec in records(rows, decimals) {
            wtr.write_record([subject, model].into_iter().chain(rec.iter().map(String::as_str)))?;
        }
    }
    wtr.flush()?;
    Ok(())
}
