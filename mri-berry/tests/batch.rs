use std::fs;
use std::path::{Path, PathBuf};

use mri_berry::batch::BatchError;
use mri_berry::prelude::*;
use ndarray::{s, Array3};

const LUT: &str = "\
#No. Label Name:                R   G   B   A
17  Left-Hippocampus            220 216 20  0
53  Right-Hippocampus           220 216 20  0
";

/// 12x12x12 网格, 标签 17 与 53 各为一个 4x4x4 立方体. `shift` 使标签 53 沿第一轴平移.
fn volume(shift: usize) -> LabelVolume {
    let mut data = Array3::<LabelId>::zeros((12, 12, 12));
    data.slice_mut(s![1..5, 1..5, 1..5]).fill(17);
    data.slice_mut(s![6 + shift..10 + shift, 6..10, 6..10]).fill(53);
    LabelVolume::from_parts(data, Affine::IDENTITY)
}

fn save(vol: &LabelVolume, path: &Path) -> PathBuf {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).unwrap();
    }
    vol.save_npz(path).unwrap();
    path.to_path_buf()
}

/// 参考位于 `{root}/fs/{subject}/mri/aseg.npz`, 候选位于 `{root}/model/{subject}.npz`.
fn fixture(root: &Path, subject: &str, pred: &LabelVolume) -> (PathBuf, PathBuf) {
    let reference = save(
        &volume(0),
        &root.join("fs").join(subject).join("mri").join("aseg.npz"),
    );
    let candidate = save(pred, &root.join("model").join(format!("{subject}.npz")));
    (reference, candidate)
}

fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init();
}

fn runner(metric: MetricKind) -> BatchRunner {
    let mut config = BatchConfig::new(metric);
    config.model_name = "synthseg".to_string();
    BatchRunner::new(config, Lut::parse(LUT))
}

#[test]
fn test_length_mismatch_processes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let refs = (0..3).map(|i| tmp.path().join(format!("r{i}.npz"))).collect::<Vec<_>>();
    let preds = (0..4).map(|i| tmp.path().join(format!("p{i}.npz"))).collect::<Vec<_>>();
    let out = tmp.path().join("out");

    let err = runner(MetricKind::Dice).run(&refs, &preds, &out).unwrap_err();
    assert!(matches!(
        err,
        BatchError::LengthMismatch { refs: 3, preds: 4 }
    ));
    assert!(!out.exists());
}

#[test]
fn test_failing_pair_does_not_abort_batch() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let (r1, p1) = fixture(root, "sub-01", &volume(1));
    let (r2, _) = fixture(root, "sub-02", &volume(1));
    // 候选形状不一致.
    let p2 = save(
        &LabelVolume::from_parts(Array3::zeros((12, 12, 13)), Affine::IDENTITY),
        &root.join("model").join("sub-02.npz"),
    );
    let (r3, p3) = fixture(root, "sub-03", &volume(1));
    let (r4, _) = fixture(root, "sub-04", &volume(1));
    let p4 = root.join("model").join("missing.npz");
    let out = root.join("out");

    let outcome = runner(MetricKind::Dice)
        .run(&[r1, r2, r3, r4], &[p1, p2, p3, p4], &out)
        .unwrap();
    let summary = *outcome.summary();
    assert_eq!((summary.pairs_total, summary.pairs_ok, summary.pairs_failed), (4, 2, 2));
    assert_eq!(summary.labels_evaluated, 4);
    assert!(summary.lut_reliable);

    let BatchOutcome::Completed { combined, pairs, .. } = outcome else {
        panic!("expected a completed batch");
    };
    assert_eq!(
        pairs.iter().map(|p| p.subject.as_str()).collect::<Vec<_>>(),
        ["sub-01", "sub-03"]
    );
    assert!(out.join("dice_sub-01.csv").is_file());
    assert!(!out.join("dice_sub-02.csv").exists());
    assert!(out.join("dice_sub-03.csv").is_file());
    assert_eq!(combined, out.join("dice_synthseg_combined.csv"));

    // 标签 53 平移一个体素: |A∩B| = 48, Dice = 96 / 128.
    let per_pair = fs::read_to_string(out.join("dice_sub-01.csv")).unwrap();
    assert_eq!(
        per_pair,
        "label,name,dice\n17,Left-Hippocampus,1.000\n53,Right-Hippocampus,0.750\n"
    );

    let text = fs::read_to_string(&combined).unwrap();
    assert_eq!(
        text.lines().collect::<Vec<_>>(),
        [
            "subject,model,label,name,dice",
            "sub-01,synthseg,17,Left-Hippocampus,1.000",
            "sub-01,synthseg,53,Right-Hippocampus,0.750",
            "sub-03,synthseg,17,Left-Hippocampus,1.000",
            "sub-03,synthseg,53,Right-Hippocampus,0.750",
        ]
    );
}

#[test]
fn test_all_pairs_failing_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let refs = [tmp.path().join("nope-ref.npz")];
    let preds = [tmp.path().join("nope-pred.npz")];

    let outcome = runner(MetricKind::SurfaceDistance)
        .run(&refs, &preds, &out)
        .unwrap();
    assert!(outcome.is_empty());
    assert_eq!(outcome.summary().pairs_failed, 1);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_surface_distance_from_lists() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let (r1, p1) = fixture(root, "sub-01", &volume(0));
    let (r2, p2) = fixture(root, "sub-02", &volume(0));

    let refs_txt = root.join("refs.txt");
    let preds_txt = root.join("preds.txt");
    fs::write(
        &refs_txt,
        format!("# references\n{}\n\n{}\n", r1.display(), r2.display()),
    )
    .unwrap();
    fs::write(&preds_txt, format!("{}\n{}\n", p1.display(), p2.display())).unwrap();

    let out = root.join("out");
    let outcome = runner(MetricKind::SurfaceDistance)
        .run_from_lists(&refs_txt, &preds_txt, &out)
        .unwrap();
    assert_eq!(outcome.summary().pairs_ok, 2);

    let text = fs::read_to_string(out.join("hd_sub-02.csv")).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    // 4x4x4 立方体: 64 个体素, 表面 56 个.
    assert_eq!(lines[1], "17,Left-Hippocampus,64,64,56,56,0.000,0.000,0.000");
    assert!(out.join("hd_synthseg_combined.csv").is_file());
}

#[test]
fn test_empty_path_list() {
    let tmp = tempfile::tempdir().unwrap();
    let list = tmp.path().join("refs.txt");
    fs::write(&list, "# nothing here\n\n").unwrap();

    let err = runner(MetricKind::Dice)
        .run_from_lists(&list, &list, tmp.path().join("out"))
        .unwrap_err();
    assert!(matches!(err, BatchError::EmptyPathList(_)));

    let err = runner(MetricKind::Dice)
        .run_from_lists(tmp.path().join("absent.txt"), &list, tmp.path().join("out"))
        .unwrap_err();
    assert!(matches!(err, BatchError::PathList { .. }));
}

#[test]
fn test_parallel_pairs_keep_input_order() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let subjects = ["sub-06", "sub-02", "sub-05", "sub-01", "sub-04", "sub-03"];
    let (refs, preds): (Vec<_>, Vec<_>) = subjects
        .iter()
        .enumerate()
        .map(|(i, s)| fixture(root, s, &volume(i % 3)))
        .unzip();
    let out = root.join("out");

    let mut config = BatchConfig::new(MetricKind::Dice);
    config.model_name = "synthseg".to_string();
    config.parallel_pairs = true;
    let outcome = BatchRunner::new(config, Lut::parse(LUT))
        .run(&refs, &preds, &out)
        .unwrap();
    assert_eq!(outcome.summary().pairs_ok, 6);

    let BatchOutcome::Completed { combined, pairs, .. } = outcome else {
        panic!("expected a completed batch");
    };
    assert_eq!(
        pairs.iter().map(|p| p.subject.as_str()).collect::<Vec<_>>(),
        subjects
    );

    let text = fs::read_to_string(&combined).unwrap();
    let rows = text.lines().skip(1).collect::<Vec<_>>();
    assert_eq!(rows.len(), 12);
    let order = rows
        .iter()
        .step_by(2)
        .map(|l| l.split(',').next().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(order, subjects);
    // 平移 0, 1, 2 个体素时标签 53 的 Dice 依次为 1, 0.75, 0.5.
    assert_eq!(rows[1], "sub-06,synthseg,53,Right-Hippocampus,1.000");
    assert_eq!(rows[3], "sub-02,synthseg,53,Right-Hippocampus,0.750");
    assert_eq!(rows[5], "sub-05,synthseg,53,Right-Hippocampus,0.500");
}

#[test]
fn test_include_with_empty_selection_writes_header_only() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let (r1, p1) = fixture(root, "sub-01", &volume(0));
    let out = root.join("out");

    let mut config = BatchConfig::new(MetricKind::Dice);
    config.policy = LabelPolicy::default().with_selection(SelectMode::Include, Vec::<Selector>::new());
    let outcome = BatchRunner::new(config, Lut::parse(LUT))
        .run(&[r1], &[p1], &out)
        .unwrap();

    let summary = *outcome.summary();
    assert_eq!((summary.pairs_ok, summary.pairs_failed), (1, 0));
    assert_eq!(summary.labels_evaluated, 0);
    // 背景与两个结构.
    assert_eq!(summary.labels_skipped, 3);

    let per_pair = fs::read_to_string(out.join("dice_sub-01.csv")).unwrap();
    assert_eq!(per_pair, "label,name,dice\n");
    let combined = fs::read_to_string(out.join("dice_model_combined.csv")).unwrap();
    assert_eq!(combined, "subject,model,label,name,dice\n");
}
