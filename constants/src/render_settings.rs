/// Default isotherm threshold (deg C)
pub const DEFAULT_ISO_VALUE: f32 = 800.0;

/// Default shell surface opacity
pub const DEFAULT_SHELL_OPACITY: f32 = 0.9;

/// Default isotherm opacity
pub const DEFAULT_ISO_OPACITY: f32 = 0.45;

/// Default colour-map range (deg C)
pub const DEFAULT_COLOR_RANGE: (f32, f32) = (50.0, 1650.0);

/// Threshold at which the signed shell distance crosses the lining surface
pub const SHELL_ISO_VALUE: f32 = 0.0;

/// Probe sampling interval (seconds)
pub const PROBE_TICK_SECONDS: f32 = 1.0;

/// Grids with more cells than this offload extraction to the compute pool
pub const ASYNC_EXTRACTION_CELL_THRESHOLD: usize = 262_144;

/// Fraction of non-finite samples tolerated (and repaired) per array
pub const NON_FINITE_TOLERATED_FRACTION: f64 = 0.01;

/// Entries in the scalar-bar lookup table handed to the view layer
pub const LOOKUP_TABLE_SIZE: usize = 256;

/// Tick labels on the scalar bar
pub const SCALAR_BAR_LABELS: usize = 5;
