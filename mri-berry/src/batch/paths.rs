//! 路径列表与受试者 ID 推断.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::SUBJECT_ROOT_MARKER;

/// 受试者 ID 推断策略, 由标签体路径得到受试者 ID.
pub type SubjectNamer = fn(&Path) -> String;

/// 读取路径列表文件: 每行一个路径, 首尾空白被去除, 空行与 `#` 开头的注释行被跳过.
///
/// 文件中的非 UTF-8 字节会被替换而不会导致失败.
pub fn read_path_list<P: AsRef<Path>>(path: P) -> io::Result<Vec<PathBuf>> {
    let bytes = fs::read(path.as_ref())?;
    Ok(parse_path_list(&String::from_utf8_lossy(&bytes)))
}

/// 解析路径列表文本. 规则同 [`read_path_list`].
pub fn parse_path_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// 去掉 `.nii.gz` / `.nii` / `.npz` 等扩展名后的文件名.
pub fn stem_subject_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".nii.gz") {
        return name[..name.len() - ".nii.gz".len()].to_string();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// 所在目录名. 没有上级目录时退化为 [`stem_subject_id`].
pub fn parent_subject_id(path: &Path) -> String {
    match path.parent().and_then(Path::file_name) {
        Some(name) => name.to_string_lossy().into_owned(),
        None => stem_subject_id(path),
    }
}

/// FreeSurfer 目录约定下的受试者 ID:
///
/// 1. 路径中含有 `mri` 一段时, 取其上一级目录名 (`.../{subject}/mri/aseg.nii.gz`);
/// 2. 否则取所在目录名;
/// 3. 否则取去掉扩展名的文件名.
pub fn infer_subject_id(path: &Path) -> String {
    let parts = path
        .iter()
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>();
    if let Some(idx) = parts.iter().rposition(|s| s == SUBJECT_ROOT_MARKER) {
        if idx > 0 {
            return parts[idx - 1].to_string();
        }
    }
    parent_subject_id(path)
}

/// 将字符串转换为安全的文件名片段: 字母, 数字, `-` 与 `_` 之外的字符一律替换为 `_`.
pub fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
