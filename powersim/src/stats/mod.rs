//! Statistical building blocks: normal helpers, descriptive summaries,
//! Wilcoxon rank tests and the Shapiro-Wilk normality test.

pub mod descriptive;
pub mod normal;
pub mod shapiro;
pub mod wilcoxon;

pub use descriptive::{mean, median, skewness, std_dev};
pub use normal::{normal_cdf, normal_quantile, normal_sf, z_critical};
pub use shapiro::{shapiro_wilk, ShapiroWilk};
pub use wilcoxon::{
    average_ranks, rank_sum_test, signed_rank_test, Alternative, PValueMethod, RankTestResult,
    EXACT_THRESHOLD,
};
