pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# IMGRATE CONFIGURATION
# =============================================================================
# Multi-rater image quality labeling. Raters are handed fixed-size batches of
# images; each batch is rated by at most `users_per_group` distinct raters
# before a new batch is created.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/imgrate/config.yml
#   3. /etc/imgrate/config.yml
#
# Values may reference environment variables with $env{NAME}.

# =============================================================================
# CATALOG
# =============================================================================
# Every immediate sub-directory of `root` is a dataset. Images inside it whose
# extension is listed below are offered for rating.

catalog:
  root: ~/imgrate/datasets
  extensions: [png, jpg, jpeg, bmp, tif, tiff]
  # Number of image payloads kept in memory for quick re-serving
  cache_entries: 64

# =============================================================================
# ASSIGNMENT
# =============================================================================

assignment:
  # Maximum distinct raters per batch
  users_per_group: 3
  # Images drawn from each dataset when a new batch is created
  target_per_dataset: 3
  # Total images per batch (defaults to target_per_dataset x dataset count)
  # batch_size: 9
  # Fixed seed for reproducible batch composition
  # seed: 42

# =============================================================================
# STORAGE
# =============================================================================

storage:
  path: ~/.local/share/imgrate/imgrate.duckdb
  batches_table: batches
  results_table: results
  # Tried in order when a rater submits; the first that succeeds wins
  submit_strategies: [append_rows, overwrite_all]

# =============================================================================
# RESULTS
# =============================================================================

results:
  # Offset used for the timestamp column (UTC when omitted)
  utc_offset: "+01:00"
  # CSV exports are written here when every submit strategy fails
  export_dir: ~/imgrate/exports

# =============================================================================
# WEB
# =============================================================================

web:
  listen: 127.0.0.1:7104

# =============================================================================
# GUIDELINES
# =============================================================================
# Shown to raters next to every image.

guidelines:
  - "Brightness: the image is well lit, without overly dark or overexposed areas."
  - "Sharpness: mucosal detail is clearly visible, with no motion blur."
  - "Natural colours: no unnatural colour casts."
  - "No artefacts: free of digital artefacts or sudden-movement disturbance."
  - "Composition: the region of interest is centred and visible."
"#
    .to_string()
}
