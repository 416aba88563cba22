//! FreeSurfer 风格的标签词汇表 (LUT), 即 `id -> 结构名` 查找表.
//!
//! 文本格式为每行 `<id> <name tokens...> <R> <G> <B> <A>`, `#` 开头为注释.
//! 无法解析的行会被直接跳过, 不会导致加载失败.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::OnceCell;

use crate::consts::UNKNOWN_NAME;
use crate::LabelId;

/// 标准 LUT 文件名.
pub const LUT_FILE_NAME: &str = "FreeSurferColorLUT.txt";

/// 指向 FreeSurfer 安装目录的环境变量.
pub const FREESURFER_HOME: &str = "FREESURFER_HOME";

/// 一行合法记录至少包含的字段数: id, 至少一个名称片段, 以及 RGBA 四个颜色分量.
const MIN_TOKENS: usize = 6;

/// 词汇表的来源.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LutSource {
    /// 从给定文件加载.
    File(PathBuf),

    /// 由内存中的文本直接解析.
    Inline,

    /// 未找到任何 LUT 文件, 退化为空表. 此时所有结构名均不可靠,
    /// 下游只能使用原始 ID.
    Fallback,
}

/// 标签名解析失败. 同一次解析中的所有问题名称一并报告.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unresolved label names: unknown {unknown:?}, ambiguous {ambiguous:?}")]
pub struct ResolveError {
    /// 这些名称在词汇表中不存在.
    pub unknown: Vec<String>,

    /// 这些名称 (大小写不敏感) 对应多个 ID.
    pub ambiguous: Vec<String>,
}

/// 标签选择器: 数值 ID 或结构名.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Selector {
    /// 直接给出的 ID. 不会与词汇表核对.
    Id(LabelId),

    /// 结构名, 大小写不敏感的精确匹配.
    Name(String),
}

impl From<LabelId> for Selector {
    #[inline]
    fn from(id: LabelId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Selector {
    /// 全部由数字组成的字符串视为 ID, 其余视为名称.
    fn from(s: &str) -> Self {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = s.parse() {
                return Self::Id(id);
            }
        }
        Self::Name(s.to_string())
    }
}

impl From<String> for Selector {
    #[inline]
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl FromStr for Selector {
    type Err = Infallible;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// `id -> 结构名` 词汇表.
#[derive(Clone, Debug)]
pub struct Lut {
    names: BTreeMap<LabelId, String>,
    source: LutSource,

    /// 小写名称 -> ID 的倒排索引, 首次按名称解析时构建.
    index: OnceCell<HashMap<String, Vec<LabelId>>>,
}

impl Lut {
    /// 空词汇表, 来源标记为 [`LutSource::Fallback`].
    pub fn fallback() -> Self {
        Self::with_source(BTreeMap::new(), LutSource::Fallback)
    }

    fn with_source(names: BTreeMap<LabelId, String>, source: LutSource) -> Self {
        Self {
            names,
            source,
            index: OnceCell::new(),
        }
    }

    /// 按以下顺序寻找 LUT 文件, 返回第一个存在的:
    ///
    /// 1. 显式给出的 `explicit`;
    /// 2. `$FREESURFER_HOME/FreeSurferColorLUT.txt`;
    /// 3. `{用户主目录}/freesurfer/FreeSurferColorLUT.txt`.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            if p.is_file() {
                return Some(p.to_path_buf());
            }
            log::warn!("LUT file {} does not exist", p.display());
        }

        if let Some(home) = std::env::var_os(FREESURFER_HOME).filter(|s| !s.is_empty()) {
            let cand = PathBuf::from(home).join(LUT_FILE_NAME);
            if cand.is_file() {
                return Some(cand);
            }
        }

        let mut cand = dirs::home_dir()?;
        cand.extend(["freesurfer", LUT_FILE_NAME]);
        cand.is_file().then_some(cand)
    }

    /// 定位并加载词汇表. 该函数不会失败: 找不到或无法读取 LUT 文件时,
    /// 记录警告并返回 [`Lut::fallback`].
    pub fn load(explicit: Option<&Path>) -> Self {
        let Some(path) = Self::locate(explicit) else {
            log::warn!("{LUT_FILE_NAME} not found; label names will be reported as {UNKNOWN_NAME}");
            return Self::fallback();
        };
        match Self::from_file(&path) {
            Ok(lut) => {
                log::info!("loaded {} labels from {}", lut.len(), path.display());
                lut
            }
            Err(e) => {
                log::warn!("cannot read {}: {e}; falling back to raw ids", path.display());
                Self::fallback()
            }
        }
    }

    /// 从文件加载. 非 UTF-8 字节会被替换而不会导致失败.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let mut lut = Self::parse(&String::from_utf8_lossy(&bytes));
        lut.source = LutSource::File(path.to_path_buf());
        Ok(lut)
    }

    /// 解析 LUT 文本.
    ///
    /// # 注意
    ///
    /// 同一 ID 出现多次时保留最后一次出现的名称, 并记录警告.
    pub fn parse(text: &str) -> Self {
        let mut names = BTreeMap::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens = line.split_whitespace().collect::<Vec<_>>();
            if tokens.len() < MIN_TOKENS {
                continue;
            }
            let Ok(id) = tokens[0].parse::<LabelId>() else {
                continue;
            };
            let name = tokens[1..tokens.len() - 4].join(" ");
            if let Some(old) = names.insert(id, name) {
                log::warn!("duplicate LUT id {id}: replacing {old:?}");
            }
        }
        Self::with_source(names, LutSource::Inline)
    }

    /// 来源.
    #[inline]
    pub fn source(&self) -> &LutSource {
        &self.source
    }

    /// 是否处于退化模式 (结构名不可靠).
    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.source == LutSource::Fallback
    }

    /// 条目个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 按 ID 升序迭代所有条目.
    pub fn iter(&self) -> impl Iterator<Item = (LabelId, &str)> + '_ {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// 查询 `id` 对应的结构名.
    #[inline]
    pub fn name(&self, id: LabelId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// 查询 `id` 对应的结构名, 不存在时返回 `"UNKNOWN"`.
    #[inline]
    pub fn name_or_unknown(&self, id: LabelId) -> &str {
        self.name(id).unwrap_or(UNKNOWN_NAME)
    }

    fn index(&self) -> &HashMap<String, Vec<LabelId>> {
        self.index.get_or_init(|| {
            let mut index = HashMap::<String, Vec<LabelId>>::new();
            for (id, name) in self.names.iter() {
                index.entry(name.to_lowercase()).or_default().push(*id);
            }
            index
        })
    }

    /// 将 ID / 名称混合选择器解析为 ID 集合.
    ///
    /// 数值选择器原样接受, 不与词汇表核对. 名称选择器大小写不敏感,
    /// 必须恰好对应一个 ID. 所有无法解析的名称会被收集起来, 一次性报告.
    pub fn resolve<'a, I>(&self, selectors: I) -> Result<BTreeSet<LabelId>, ResolveError>
    where
        I: IntoIterator<Item = &'a Selector>,
    {
        let mut resolved = BTreeSet::new();
        let mut unknown = Vec::new();
        let mut ambiguous = Vec::new();

        for sel in selectors {
            match sel {
                Selector::Id(id) => {
                    resolved.insert(*id);
                }
                Selector::Name(name) => match self.index().get(&name.to_lowercase()) {
                    Some(ids) if ids.len() == 1 => {
                        resolved.insert(ids[0]);
                    }
                    Some(_) => ambiguous.push(name.clone()),
                    None => unknown.push(name.clone()),
                },
            }
        }

        if unknown.is_empty() && ambiguous.is_empty() {
            return Ok(resolved);
        }
        let err = ResolveError { unknown, ambiguous };
        log::error!("{err}");
        Err(err)
    }
}
