//! agree: 批量计算参考分割与候选分割之间的 Dice / HD 一致性指标.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use mri_berry::batch::{infer_subject_id, parent_subject_id, stem_subject_id, SubjectNamer};
use mri_berry::consts::{groups, DEFAULT_DECIMALS, DEFAULT_MIN_VOXELS};
use mri_berry::prelude::*;

#[derive(Parser)]
#[command(name = "agree")]
#[command(about = "Per-structure agreement (Dice, HD50/HD95/HDmax) between two sets of label volumes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dice overlap per structure.
    Dice(BatchArgs),

    /// Bidirectional surface distances (HD50/HD95/HDmax, mm) per structure.
    Hd(BatchArgs),

    /// Print the label vocabulary, or resolve the given selectors against it.
    Lut {
        /// Path to FreeSurferColorLUT.txt.
        #[arg(long)]
        lut: Option<PathBuf>,

        /// Label ids or structure names.
        selectors: Vec<String>,
    },

    /// Print the built-in structure groups.
    Groups,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SubjectArg {
    /// `.../{subject}/mri/...`, else the parent directory name.
    Auto,
    /// Parent directory name.
    Parent,
    /// File name without extension.
    Stem,
}

impl SubjectArg {
    fn namer(self) -> SubjectNamer {
        match self {
            Self::Auto => infer_subject_id,
            Self::Parent => parent_subject_id,
            Self::Stem => stem_subject_id,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct BatchArgs {
    /// Text file with one reference volume path per line.
    #[arg(long)]
    refs: PathBuf,

    /// Text file with one candidate volume path per line, aligned with --refs.
    #[arg(long)]
    preds: PathBuf,

    /// Output directory for per-subject and combined tables.
    #[arg(long, default_value = "results")]
    out: PathBuf,

    /// Model name written to the combined table.
    #[arg(long, default_value = "model")]
    model: String,

    /// Path to FreeSurferColorLUT.txt (default: $FREESURFER_HOME, then ~/freesurfer).
    #[arg(long)]
    lut: Option<PathBuf>,

    /// Label ids or structure names, comma separated.
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    /// Built-in structure groups to add to the selection (see `agree groups`).
    #[arg(long, value_delimiter = ',')]
    group: Vec<String>,

    /// How to apply the selection: all, include or exclude.
    /// Defaults to `include` when a selection is given, `all` otherwise.
    #[arg(long)]
    mode: Option<SelectMode>,

    /// Structures with fewer voxels in either volume are skipped.
    #[arg(long, default_value_t = DEFAULT_MIN_VOXELS)]
    min_voxels: usize,

    /// Keep the background label (0).
    #[arg(long)]
    keep_background: bool,

    /// Evaluate every label present in either volume, with no size filter.
    #[arg(long)]
    union: bool,

    /// Decimal places of persisted values.
    #[arg(long, default_value_t = DEFAULT_DECIMALS)]
    decimals: u32,

    /// Write full-precision values.
    #[arg(long, conflicts_with = "decimals")]
    no_round: bool,

    /// How to derive subject ids from reference paths.
    #[arg(long, value_enum, default_value_t = SubjectArg::Auto)]
    subject: SubjectArg,

    /// Worker threads (default: all cores).
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Evaluate several pairs concurrently.
    #[arg(long)]
    parallel_pairs: bool,
}

impl BatchArgs {
    fn selectors(&self) -> anyhow::Result<Vec<Selector>> {
        let mut selectors = self
            .select
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Selector::from(s.as_str()))
            .collect::<Vec<_>>();
        for name in &self.group {
            let Some(group) = groups::by_name(name) else {
                let known = groups::ALL.iter().map(|g| g.name).collect::<Vec<_>>();
                bail!("unknown structure group {name:?}, expected one of {known:?}");
            };
            selectors.extend(group.ids.iter().copied().map(Selector::Id));
        }
        Ok(selectors)
    }

    fn policy(&self, lut: &Lut) -> anyhow::Result<LabelPolicy> {
        let mut policy = if self.union {
            LabelPolicy::union()
        } else {
            LabelPolicy {
                exclude_background: !self.keep_background,
                min_voxels: self.min_voxels,
                ..LabelPolicy::default()
            }
        };

        let selectors = self.selectors()?;
        let mode = self.mode.unwrap_or(if selectors.is_empty() {
            SelectMode::All
        } else {
            SelectMode::Include
        });
        if mode == SelectMode::All && !selectors.is_empty() {
            log::warn!("--mode all ignores the {} given selectors", selectors.len());
        }
        if mode != SelectMode::All {
            // 名称在整批开始前统一核对.
            let ids = lut.resolve(&selectors).context("invalid label selection")?;
            log::info!("{mode} {} labels: {ids:?}", ids.len());
        }
        policy = policy.with_selection(mode, selectors);
        Ok(policy)
    }

    fn config(&self, metric: MetricKind, lut: &Lut) -> anyhow::Result<BatchConfig> {
        let mut config = BatchConfig::new(metric);
        config.policy = self.policy(lut)?;
        config.decimals = (!self.no_round).then_some(self.decimals);
        config.model_name = self.model.clone();
        config.namer = self.subject.namer();
        config.parallel_pairs = self.parallel_pairs;
        Ok(config)
    }
}

fn run_batch(metric: MetricKind, args: &BatchArgs) -> anyhow::Result<()> {
    let jobs = args.jobs.unwrap_or_else(utils::cpus).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
        .context("cannot initialise the thread pool")?;

    let lut = Lut::load(args.lut.as_deref());
    let config = args.config(metric, &lut)?;
    log::info!(
        "{metric} batch: model {:?}, {} threads, output {}",
        config.model_name,
        jobs,
        args.out.display()
    );

    let runner = BatchRunner::new(config, lut);
    let outcome = runner
        .run_from_lists(&args.refs, &args.preds, &args.out)
        .with_context(|| {
            format!(
                "cannot run batch over {} and {}",
                args.refs.display(),
                args.preds.display()
            )
        })?;

    utils::describe_into(outcome.summary(), io::stdout().lock())?;
    match outcome {
        BatchOutcome::Empty(_) => bail!("no pair could be evaluated"),
        BatchOutcome::Completed { combined, .. } => {
            println!("combined table: {}", combined.display());
            Ok(())
        }
    }
}

fn print_lut(lut_path: Option<PathBuf>, selectors: &[String]) -> anyhow::Result<()> {
    let lut = Lut::load(lut_path.as_deref());
    let mut out = io::stdout().lock();
    match lut.source() {
        LutSource::File(p) => writeln!(out, "source: {} ({} labels)", p.display(), lut.len())?,
        LutSource::Inline => writeln!(out, "source: inline ({} labels)", lut.len())?,
        LutSource::Fallback => writeln!(out, "source: none, names are {UNKNOWN_NAME}")?,
    }
    utils::sep_to(&mut out)?;

    if selectors.is_empty() {
        for (id, name) in lut.iter() {
            writeln!(out, "{id:>6}  {name}")?;
        }
        return Ok(());
    }
    let selectors = selectors
        .iter()
        .map(|s| Selector::from(s.as_str()))
        .collect::<Vec<_>>();
    let ids = lut.resolve(&selectors).context("cannot resolve selectors")?;
    for id in ids {
        writeln!(out, "{id:>6}  {}", lut.name_or_unknown(id))?;
    }
    Ok(())
}

fn print_groups() -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "structure groups, version {}", groups::VERSION)?;
    utils::sep_to(&mut out)?;
    for g in groups::ALL.iter() {
        let ids = g.ids.iter().map(ToString::to_string).collect::<Vec<_>>();
        writeln!(out, "{:<20}{}", g.name, ids.join(","))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    utils::init_logger(cli.verbose, cli.quiet).context("cannot initialise logger")?;

    match cli.command {
        Commands::Dice(args) => run_batch(MetricKind::Dice, &args),
        Commands::Hd(args) => run_batch(MetricKind::SurfaceDistance, &args),
        Commands::Lut { lut, selectors } => print_lut(lut, &selectors),
        Commands::Groups => print_groups(),
    }
}
