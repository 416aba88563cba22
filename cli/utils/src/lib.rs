//! 命令行工具依赖的通用组件.

use std::io;

use log::LevelFilter;
use mri_berry::batch::BatchSummary;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep_to<W: io::Write>(mut w: W) -> io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 由 `-v` 出现次数与 `-q` 决定日志级别. 默认为 `info`.
pub fn log_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Warn;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// 初始化日志. 重复初始化会失败.
pub fn init_logger(verbose: u8, quiet: bool) -> Result<(), log::SetLoggerError> {
    simple_logger::SimpleLogger::new()
        .with_level(log_level(verbose, quiet))
        .init()
}

/// 将批处理统计以表格形式写出.
pub fn describe_into<W: io::Write>(summary: &BatchSummary, mut w: W) -> io::Result<()> {
    sep_to(&mut w)?;
    writeln!(w, "pairs       {:>6}", summary.pairs_total)?;
    writeln!(w, "  ok        {:>6}", summary.pairs_ok)?;
    writeln!(w, "  failed    {:>6}", summary.pairs_failed)?;
    writeln!(w, "labels      {:>6}", summary.labels_evaluated)?;
    writeln!(w, "  skipped   {:>6}", summary.labels_skipped)?;
    if !summary.lut_reliable {
        writeln!(w, "(no label vocabulary: names are UNKNOWN)")?;
    }
    sep_to(&mut w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, false), LevelFilter::Info);
        assert_eq!(log_level(2, false), LevelFilter::Trace);
        assert_eq!(log_level(3, true), LevelFilter::Warn);
    }

    #[test]
    fn test_describe_into() {
        let summary = BatchSummary {
            pairs_total: 2,
            pairs_ok: 1,
            pairs_failed: 1,
            labels_evaluated: 7,
            labels_skipped: 3,
            lut_reliable: true,
        };
        let mut buf = vec![];
        describe_into(&summary, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 7);
        assert!(text.contains("failed         1"));
        assert!(!text.contains("UNKNOWN"));
    }
}
