//! 通用常量.

use crate::LabelId;

/// 背景标签值.
pub const BACKGROUND: LabelId = 0;

/// 默认的最小体素数. 任一标签体中体素数低于该值的结构不参与度量.
pub const DEFAULT_MIN_VOXELS: usize = 50;

/// 落盘时浮点指标默认保留的小数位数.
pub const DEFAULT_DECIMALS: u32 = 3;

/// 词汇表中不存在的标签所使用的占位名称.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// FreeSurfer 受试者目录中, 标签体所在的子目录名.
/// 路径 `.../{subject}/mri/aseg.nii.gz` 中 `mri` 的上一级即为受试者 ID.
pub const SUBJECT_ROOT_MARKER: &str = "mri";

/// 结构分组表.
///
/// Dice 与 HD 两种度量共享同一张表, 避免两处各自维护 ID 列表而产生不一致.
/// 皮层分区 ID 采用 Desikan-Killiany 图谱编号: 左半球为 `1000 + n`,
/// 右半球为 `2000 + n`.
pub mod groups {
    use crate::LabelId;

    /// 分组表版本. 任何分组内容的变更都应递增该值.
    pub const VERSION: u32 = 2;

    /// 一个具名的结构 ID 集合.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct StructureGroup {
        /// 分组名 (小写, 用于命令行选择).
        pub name: &'static str,

        /// 组内所有标签 ID, 升序.
        pub ids: &'static [LabelId],
    }

    /// 皮层下结构: 左右两侧的丘脑, 尾状核, 壳核, 苍白球, 海马, 杏仁核与伏隔核.
    pub const SUBCORTEX: StructureGroup = StructureGroup {
        name: "subcortex",
        ids: &[10, 11, 12, 13, 17, 18, 26, 49, 50, 51, 52, 53, 54, 58],
    };

    /// 重点关注的皮层分区.
    pub const CORTEX_OF_INTEREST: StructureGroup = StructureGroup {
        name: "cortex-of-interest",
        ids: &[
            1002, 1006, 1007, 1008, 1012, 1014, 1028, 1030, 1035, 2002, 2006, 2007, 2008, 2012,
            2014, 2030, 2035,
        ],
    };

    /// 额叶.
    pub const FRONTAL: StructureGroup = StructureGroup {
        name: "frontal",
        ids: &[
            1003, 1012, 1014, 1017, 1018, 1019, 1020, 1024, 1027, 1028, 2003, 2012, 2014, 2017,
            2018, 2019, 2020, 2024, 2027, 2028,
        ],
    };

    /// 顶叶.
    pub const PARIETAL: StructureGroup = StructureGroup {
        name: "parietal",
        ids: &[1008, 1022, 1025, 1029, 1031, 2008, 2022, 2025, 2029, 2031],
    };

    /// 颞叶.
    pub const TEMPORAL: StructureGroup = StructureGroup {
        name: "temporal",
        ids: &[
            1006, 1007, 1009, 1015, 1016, 1030, 1034, 2006, 2007, 2009, 2015, 2016, 2030, 2034,
        ],
    };

    /// 枕叶.
    pub const OCCIPITAL: StructureGroup = StructureGroup {
        name: "occipital",
        ids: &[1005, 1011, 1013, 1021, 2005, 2011, 2013, 2021],
    };

    /// 全部分组.
    pub static ALL: [StructureGroup; 6] = [
        SUBCORTEX,
        CORTEX_OF_INTEREST,
        FRONTAL,
        PARIETAL,
        TEMPORAL,
        OCCIPITAL,
    ];

    /// 按名称 (大小写不敏感) 查找分组.
    pub fn by_name(name: &str) -> Option<&'static StructureGroup> {
        let name = name.trim();
        ALL.iter().find(|g| g.name.eq_ignore_ascii_case(name))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_groups_sorted_and_unique() {
            for g in ALL.iter() {
                assert!(g.ids.windows(2).all(|w| w[0] < w[1]), "{}", g.name);
            }
        }

        #[test]
        fn test_lobes_are_hemisphere_symmetric() {
            for g in [FRONTAL, PARIETAL, TEMPORAL, OCCIPITAL] {
                let (lh, rh): (Vec<LabelId>, Vec<LabelId>) =
                    g.ids.iter().copied().partition(|&id| id < 2000);
                assert_eq!(lh.len(), rh.len());
                assert!(lh.iter().zip(rh.iter()).all(|(l, r)| l + 1000 == *r));
            }
        }

        /// 以成对 (左, 右) 书写的分区列表, 排序后应与分组完全一致.
        fn assert_lobe(g: StructureGroup, listed: &[LabelId]) {
            let mut listed = listed.to_vec();
            listed.sort_unstable();
            assert_eq!(g.ids, listed.as_slice(), "{}", g.name);
        }

        #[test]
        fn test_lobe_members() {
            assert_lobe(
                FRONTAL,
                &[
                    1003, 2003, 1012, 2012, 1014, 2014, 1017, 2017, 1018, 2018, 1019, 2019, 1020,
                    2020, 1024, 2024, 1027, 2027, 1028, 2028,
                ],
            );
            assert_lobe(
                TEMPORAL,
                &[
                    1006, 2006, 1007, 2007, 1009, 2009, 1015, 2015, 2016, 1016, 1030, 2030, 2034,
                    1034,
                ],
            );
            assert_lobe(
                PARIETAL,
                &[1008, 2008, 1022, 2022, 1025, 2025, 2029, 1029, 1031, 2031],
            );
            assert_lobe(
                OCCIPITAL,
                &[1005, 2005, 1011, 2011, 1013, 2013, 1021, 2021],
            );
            // 颞极 (1033) 与前扣带 (1026) 不属于任何脑叶.
            assert!(!FRONTAL.ids.contains(&1026) && !TEMPORAL.ids.contains(&1033));
        }

        #[test]
        fn test_by_name() {
            assert_eq!(by_name("Temporal"), Some(&TEMPORAL));
            assert_eq!(by_name(" subcortex "), Some(&SUBCORTEX));
            assert!(by_name("cerebellum").is_none());
        }
    }
}
