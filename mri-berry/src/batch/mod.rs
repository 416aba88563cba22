//! 批处理: 成对读取参考与候选路径列表, 逐对计算指标并落盘.
//!
//! 单对的任何失败 (文件缺失, 读取失败, 形状不一致, 选择器无法解析, 写入失败)
//! 只会被记录到日志, 不会中断整批. 只有路径列表本身的问题 (长度不一致,
//! 列表为空或无法读取) 以及输出目录无法创建会在处理任何体对之前直接返回错误.
//!
//! 输出:
//!
//! - 每对一个结果表 `<metric>_<subject>.csv`, 在该对计算完成后立即写入;
//! - 整批一个汇总表 `<metric>_<model>_combined.csv`, 行顺序与输入顺序一致.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::DEFAULT_DECIMALS;
use crate::lut::Lut;
use crate::metrics::{evaluate, LabelPolicy, MetricError, MetricKind, MetricTable};
use crate::{LabelVolume, VolumeError};

mod paths;
mod table;

pub use paths::{
    infer_subject_id, parent_subject_id, parse_path_list, read_path_list, sanitize_filename,
    stem_subject_id, SubjectNamer,
};
pub use table::{format_value, header, records, save_table, write_combined, write_table};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// 对整批致命的错误. 出现这些错误时没有任何体对被处理.
#[derive(thiserror::Error, Debug)]
pub enum BatchError {
    /// 两个路径列表长度不一致.
    #[error("path lists differ in length: {refs} references vs. {preds} candidates")]
    LengthMismatch {
        /// 参考路径数.
        refs: usize,
        /// 候选路径数.
        preds: usize,
    },

    /// 路径列表文件中没有任何路径.
    #[error("path list {0:?} contains no paths")]
    EmptyPathList(PathBuf),

    /// 路径列表文件无法读取.
    #[error("cannot read path list {path:?}: {source}")]
    PathList {
        /// 列表文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 输出目录无法创建.
    #[error("cannot create output directory {path:?}: {source}")]
    OutputDir {
        /// 输出目录.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 汇总表写入失败.
    #[error("cannot write combined table {path:?}: {source}")]
    Combined {
        /// 汇总表路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: csv::Error,
    },
}

/// 只对当前体对致命的错误.
#[derive(thiserror::Error, Debug)]
pub enum PairError {
    /// 参考标签体不存在.
    #[error("reference volume {0:?} does not exist")]
    MissingReference(PathBuf),

    /// 候选标签体不存在.
    #[error("candidate volume {0:?} does not exist")]
    MissingCandidate(PathBuf),

    /// 标签体读取失败.
    #[error("cannot load {path:?}: {source}")]
    Volume {
        /// 标签体路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: VolumeError,
    },

    /// 指标计算失败.
    #[error(transparent)]
    Metric(#[from] MetricError),

    /// 单对结果表写入失败.
    #[error("cannot write table {path:?}: {source}")]
    Write {
        /// 结果表路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: csv::Error,
    },
}

/// 批处理配置.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// 度量种类.
    pub metric: MetricKind,

    /// 标签集合筛选策略, 对整批所有体对相同.
    pub policy: LabelPolicy,

    /// 落盘时浮点值保留的小数位数. `None` 表示不做舍入.
    pub decimals: Option<u32>,

    /// 模型名, 写入汇总表并用于汇总表文件名.
    pub model_name: String,

    /// 由参考标签体路径推断受试者 ID 的策略.
    pub namer: SubjectNamer,

    /// 是否在体对之间并行. 仅在启用 `rayon` feature 时生效.
    pub parallel_pairs: bool,
}

impl BatchConfig {
    /// 指定度量的默认配置: 默认筛选策略, 保留 3 位小数, FreeSurfer 目录约定推断受试者 ID.
    pub fn new(metric: MetricKind) -> Self {
        Self {
            metric,
            policy: LabelPolicy::default(),
            decimals: Some(DEFAULT_DECIMALS),
            model_name: "model".to_string(),
            namer: infer_subject_id,
            parallel_pairs: false,
        }
    }
}

/// 单个体对的计算结果.
#[derive(Clone, Debug)]
pub struct PairResult {
    /// 在输入列表中的位置 (从 0 开始).
    pub index: usize,
    /// 受试者 ID.
    pub subject: String,
    /// 单对结果表路径.
    pub path: PathBuf,
    /// 计算结果.
    pub table: MetricTable,
}

/// 批处理统计, 用于审计被静默丢弃的标签与失败的体对.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchSummary {
    /// 体对总数.
    pub pairs_total: usize,
    /// 成功的体对数.
    pub pairs_ok: usize,
    /// 失败的体对数.
    pub pairs_failed: usize,
    /// 所有成功体对中参与度量的标签总数.
    pub labels_evaluated: usize,
    /// 所有成功体对中被跳过的标签总数.
    pub labels_skipped: usize,
    /// 结构名是否来自真实的词汇表文件.
    pub lut_reliable: bool,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} pairs succeeded ({} failed), {} labels evaluated, {} skipped",
            self.pairs_ok, self.pairs_total, self.pairs_failed, self.labels_evaluated,
            self.labels_skipped
        )?;
        if !self.lut_reliable {
            f.write_str(", structure names unavailable")?;
        }
        Ok(())
    }
}

/// 批处理的最终结果.
#[derive(Clone, Debug)]
pub enum BatchOutcome {
    /// 没有任何体对成功, 未写出汇总表.
    Empty(BatchSummary),

    /// 至少一个体对成功.
    Completed {
        /// 汇总表路径.
        combined: PathBuf,
        /// 成功体对的结果, 按输入顺序.
        pairs: Vec<PairResult>,
        /// 统计.
        summary: BatchSummary,
    },
}

impl BatchOutcome {
    /// 统计.
    pub fn summary(&self) -> &BatchSummary {
        match self {
            Self::Empty(summary) => summary,
            Self::Completed { summary, .. } => summary,
        }
    }

    /// 是否没有任何体对成功.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty(_))
    }
}

/// 单个待处理的体对.
struct Job<'a> {
    index: usize,
    reference: &'a Path,
    candidate: &'a Path,
    subject: String,
    path: PathBuf,
}

/// 批处理器.
#[derive(Clone, Debug)]
pub struct BatchRunner {
    config: BatchConfig,
    lut: Lut,
}

impl BatchRunner {
    /// 以给定配置与词汇表构造.
    pub fn new(config: BatchConfig, lut: Lut) -> Self {
        Self { config, lut }
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// 词汇表.
    #[inline]
    pub fn lut(&self) -> &Lut {
        &self.lut
    }

    /// 从两个路径列表文件读取体对并运行. 列表的解析规则见 [`read_path_list`].
    pub fn run_from_lists<P, Q, R>(
        &self,
        refs_list: P,
        preds_list: Q,
        out_dir: R,
    ) -> Result<BatchOutcome, BatchError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        let refs = load_list(refs_list.as_ref())?;
        let preds = load_list(preds_list.as_ref())?;
        self.run(&refs, &preds, out_dir)
    }

    /// 逐对计算并写出结果.
    ///
    /// # 注意
    ///
    /// 两个列表长度不一致时立即返回 [`BatchError::LengthMismatch`], 不处理任何体对.
    /// 单对失败只记录日志, 不会中断整批.
    pub fn run<P: AsRef<Path>>(
        &self,
        refs: &[PathBuf],
        preds: &[PathBuf],
        out_dir: P,
    ) -> Result<BatchOutcome, BatchError> {
        if refs.len() != preds.len() {
            return Err(BatchError::LengthMismatch {
                refs: refs.len(),
                preds: preds.len(),
            });
        }
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir).map_err(|source| BatchError::OutputDir {
            path: out_dir.to_path_buf(),
            source,
        })?;
        if self.lut.is_fallback() {
            log::warn!("no label vocabulary found, all structures will be named UNKNOWN");
        }

        let jobs = self.plan(refs, preds, out_dir);
        let results = self.process_all(jobs);

        let mut summary = BatchSummary {
            pairs_total: refs.len(),
            lut_reliable: !self.lut.is_fallback(),
            ..BatchSummary::default()
        };
        let mut pairs = Vec::with_capacity(results.len());
        for res in results {
            match res {
                Ok(pair) => {
                    summary.pairs_ok += 1;
                    summary.labels_evaluated += pair.table.rows.len();
                    summary.labels_skipped += pair.table.skipped.len();
                    pairs.push(pair);
                }
                Err(_) => summary.pairs_failed += 1,
            }
        }

        if pairs.is_empty() {
            log::error!("{summary}");
            return Ok(BatchOutcome::Empty(summary));
        }

        let combined = out_dir.join(format!(
            "{}_{}_combined.csv",
            self.config.metric.tag(),
            sanitize_filename(&self.config.model_name)
        ));
        self.write_combined(&combined, &pairs)
            .map_err(|source| BatchError::Combined {
                path: combined.clone(),
                source,
            })?;
        log::info!("{summary}");
        log::info!("combined table written to {}", combined.display());

        Ok(BatchOutcome::Completed {
            combined,
            pairs,
            summary,
        })
    }

    /// 读取一对标签体并计算指标, 不写任何文件.
    pub fn run_pair(&self, reference: &Path, candidate: &Path) -> Result<MetricTable, PairError> {
        if !reference.exists() {
            return Err(PairError::MissingReference(reference.to_path_buf()));
        }
        if !candidate.exists() {
            return Err(PairError::MissingCandidate(candidate.to_path_buf()));
        }
        let reference = open(reference)?;
        let candidate = open(candidate)?;
        let table = evaluate(
            self.config.metric,
            &reference,
            &candidate,
            &self.config.policy,
            &self.lut,
        )?;
        Ok(table)
    }

    /// 为每个体对确定受试者 ID 与结果表文件名.
    ///
    /// 文件名冲突时追加序号 (默认为体对在输入中从 1 开始的位置),
    /// 序号得到的文件名若仍被占用则继续递增, 保证所有文件名互不相同.
    fn plan<'a>(&self, refs: &'a [PathBuf], preds: &'a [PathBuf], out_dir: &Path) -> Vec<Job<'a>> {
        let subjects = refs
            .iter()
            .map(|p| (self.config.namer)(p))
            .collect::<Vec<_>>();
        let stems = subjects
            .iter()
            .map(|s| sanitize_filename(s))
            .collect::<Vec<_>>();
        let mut seen = HashMap::<&str, usize>::new();
        for stem in &stems {
            *seen.entry(stem.as_str()).or_default() += 1;
        }

        let tag = self.config.metric.tag();
        let collides = |stem: &str| seen.get(stem).copied().unwrap_or(0) > 1;
        // 不冲突的文件名先行占用.
        let mut used = stems
            .iter()
            .filter(|stem| !collides(stem.as_str()))
            .map(|stem| format!("{tag}_{stem}.csv"))
            .collect::<HashSet<_>>();
        let names = stems
            .iter()
            .enumerate()
            .map(|(index, stem)| {
                if !collides(stem.as_str()) {
                    return format!("{tag}_{stem}.csv");
                }
                let mut n = index + 1;
                loop {
                    let name = format!("{tag}_{stem}_{n}.csv");
                    if used.insert(name.clone()) {
                        break name;
                    }
                    n += 1;
                }
            })
            .collect::<Vec<_>>();

        refs.iter()
            .zip(preds)
            .zip(subjects)
            .zip(names)
            .enumerate()
            .map(|(index, (((reference, candidate), subject), name))| Job {
                index,
                reference,
                candidate,
                subject,
                path: out_dir.join(name),
            })
            .collect()
    }

    /// 处理单个体对并立即写出其结果表. 失败时记录日志.
    fn process(&self, job: Job<'_>) -> Result<PairResult, PairError> {
        log::info!(
            "[{}] {}: {} vs. {}",
            job.index + 1,
            job.subject,
            job.reference.display(),
            job.candidate.display()
        );
        let outcome = self.run_pair(job.reference, job.candidate).and_then(|table| {
            save_table(&job.path, &table.rows, self.config.decimals).map_err(|source| {
                PairError::Write {
                    path: job.path.clone(),
                    source,
                }
            })?;
            Ok(table)
        });

        match outcome {
            Ok(table) => {
                log::info!(
                    "[{}] {}: {} labels, {} skipped -> {}",
                    job.index + 1,
                    job.subject,
                    table.rows.len(),
                    table.skipped.len(),
                    job.path.display()
                );
                Ok(PairResult {
                    index: job.index,
                    subject: job.subject,
                    path: job.path,
                    table,
                })
            }
            Err(e) => {
                log::error!("[{}] {}: {e}", job.index + 1, job.subject);
                Err(e)
            }
        }
    }

    /// 处理所有体对, 结果按输入顺序排列.
    #[cfg(feature = "rayon")]
    fn process_all(&self, jobs: Vec<Job<'_>>) -> Vec<Result<PairResult, PairError>> {
        if self.config.parallel_pairs {
            jobs.into_par_iter().map(|job| self.process(job)).collect()
        } else {
            jobs.into_iter().map(|job| self.process(job)).collect()
        }
    }

    /// 处理所有体对, 结果按输入顺序排列.
    #[cfg(not(feature = "rayon"))]
    fn process_all(&self, jobs: Vec<Job<'_>>) -> Vec<Result<PairResult, PairError>> {
        jobs.into_iter().map(|job| self.process(job)).collect()
    }

    fn write_combined(&self, path: &Path, pairs: &[PairResult]) -> csv::Result<()> {
        write_combined(
            File::create(path)?,
            self.config.metric,
            &self.config.model_name,
            pairs.iter().map(|p| (p.subject.as_str(), &p.table.rows)),
            self.config.decimals,
        )
    }
}

fn open(path: &Path) -> Result<LabelVolume, PairError> {
    LabelVolume::open(path).map_err(|source| PairError::Volume {
        path: path.to_path_buf(),
        source,
    })
}

fn load_list(path: &Path) -> Result<Vec<PathBuf>, BatchError> {
    let list = read_path_list(path).map_err(|source| BatchError::PathList {
        path: path.to_path_buf(),
        source,
    })?;
    if list.is_empty() {
        return Err(BatchError::EmptyPathList(path.to_path_buf()));
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_disambiguates_collisions() {
        let runner = BatchRunner::new(BatchConfig::new(MetricKind::Dice), Lut::fallback());
        let refs = vec![
            PathBuf::from("/a/sub-1/mri/aseg.nii.gz"),
            PathBuf::from("/b/sub-1/mri/aseg.nii.gz"),
            PathBuf::from("/c/sub 2/mri/aseg.nii.gz"),
        ];
        let preds = refs.clone();
        let jobs = runner.plan(&refs, &preds, Path::new("/out"));
        let names = jobs
            .iter()
            .map(|j| j.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["dice_sub-1_1.csv", "dice_sub-1_2.csv", "dice_sub_2.csv"]);
        assert_eq!(jobs[2].subject, "sub 2");
    }

    #[test]
    fn test_plan_suffix_does_not_reuse_another_subject() {
        let mut config = BatchConfig::new(MetricKind::Dice);
        config.namer = stem_subject_id;
        let runner = BatchRunner::new(config, Lut::fallback());
        let refs = ["/a/sub.npz", "/b/sub.npz", "/c/sub_1.npz"].map(PathBuf::from);
        let jobs = runner.plan(&refs, &refs, Path::new("/out"));
        let names = jobs
            .iter()
            .map(|j| j.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["dice_sub_2.csv", "dice_sub_3.csv", "dice_sub_1.csv"]);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn test_custom_namer() {
        let mut config = BatchConfig::new(MetricKind::SurfaceDistance);
        config.namer = stem_subject_id;
        let runner = BatchRunner::new(config, Lut::fallback());
        let refs = vec![PathBuf::from("/x/mri/case7.nii.gz")];
        let jobs = runner.plan(&refs, &refs, Path::new("out"));
        assert_eq!(jobs[0].subject, "case7");
        assert_eq!(jobs[0].path, Path::new("out/hd_case7.csv"));
    }

    #[test]
    fn test_missing_files_fail_the_pair() {
        let runner = BatchRunner::new(BatchConfig::new(MetricKind::Dice), Lut::fallback());
        let err = runner
            .run_pair(Path::new("/no/such/ref.nii"), Path::new("/no/such/pred.nii"))
            .unwrap_err();
        assert!(matches!(err, PairError::MissingReference(_)));
    }

    #[test]
    fn test_summary_display() {
        let s = BatchSummary {
            pairs_total: 4,
            pairs_ok: 3,
            pairs_failed: 1,
            labels_evaluated: 30,
            labels_skipped: 6,
            lut_reliable: false,
        };
        assert_eq!(
            s.to_string(),
            "3 of 4 pairs succeeded (1 failed), 30 labels evaluated, 6 skipped, \
             structure names unavailable"
        );
    }
}
