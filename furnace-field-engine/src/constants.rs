/// Asset-relative location of the generated datasets
pub const RELATIVE_DATASET_PATH: &str = "datasets";

/// Case served before the operator picks one
pub const DEFAULT_CASE: &str = "baseline_design";
