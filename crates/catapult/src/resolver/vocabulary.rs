//! The engine's command-line vocabulary.
//!
//! Each entry is a descriptor key (the engine flag with `-` replaced by
//! `_`) and the shape of its value. Table order is the order flags are
//! emitted in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Str,
    Number,
    Bool,
    List,
}

impl ParamKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ParamKind::Str => "a string",
            ParamKind::Number => "a number",
            ParamKind::Bool => "a boolean",
            ParamKind::List => "a list",
        }
    }
}

pub const VOCABULARY: &[(&str, ParamKind)] = &[
    ("channel_run_norm", ParamKind::Bool),
    ("channel_spec_norm", ParamKind::Bool),
    ("channels", ParamKind::List),
    ("clear_mods", ParamKind::Bool),
    ("compact_report", ParamKind::Bool),
    ("cont_quant_exclude", ParamKind::Bool),
    ("convert", ParamKind::Bool),
    ("cut", ParamKind::Str),
    ("decoy_channel", ParamKind::Str),
    ("decoys_preserve_spectrum", ParamKind::Bool),
    ("dir", ParamKind::Str),
    ("direct_quant", ParamKind::Bool),
    ("dl_no_im", ParamKind::Bool),
    ("dl_no_rt", ParamKind::Bool),
    ("duplicate_proteins", ParamKind::Bool),
    ("exact_fdr", ParamKind::Bool),
    ("export_quant", ParamKind::Bool),
    ("ext", ParamKind::Str),
    ("f", ParamKind::List),
    ("fasta", ParamKind::List),
    ("fasta_filter", ParamKind::Str),
    ("fasta_search", ParamKind::Bool),
    ("fixed_mod", ParamKind::List),
    ("force_swissprot", ParamKind::Bool),
    ("foreign_decoys", ParamKind::Bool),
    ("full_unimod", ParamKind::Bool),
    ("gen_fr_restriction", ParamKind::Bool),
    ("gen_spec_lib", ParamKind::Bool),
    ("global_mass_cal", ParamKind::Bool),
    ("global_norm", ParamKind::Bool),
    ("high_acc", ParamKind::Bool),
    ("ids_to_names", ParamKind::Bool),
    ("il_eq", ParamKind::Bool),
    ("im_window", ParamKind::Str),
    ("im_window_factor", ParamKind::Str),
    ("individual_mass_acc", ParamKind::Bool),
    ("individual_reports", ParamKind::Bool),
    ("individual_windows", ParamKind::Bool),
    ("int_removal", ParamKind::Str),
    ("lib", ParamKind::List),
    ("lib_fixed_mod", ParamKind::List),
    ("library_headers", ParamKind::List),
    ("mass_acc", ParamKind::Number),
    ("mass_acc_cal", ParamKind::Str),
    ("mass_acc_ms1", ParamKind::Number),
    ("matrices", ParamKind::Bool),
    ("matrix_ch_qvalue", ParamKind::Str),
    ("matrix_qvalue", ParamKind::Str),
    ("matrix_spec_q", ParamKind::Bool),
    ("matrix_tr_qvalue", ParamKind::Str),
    ("max_fr", ParamKind::Str),
    ("max_fr_mz", ParamKind::Number),
    ("max_pep_len", ParamKind::Number),
    ("max_pr_charge", ParamKind::Number),
    ("max_pr_mz", ParamKind::Number),
    ("mbr_fix_settings", ParamKind::Bool),
    ("met_excision", ParamKind::Bool),
    ("min_fr", ParamKind::Str),
    ("min_fr_mz", ParamKind::Number),
    ("min_peak", ParamKind::Str),
    ("min_pep_len", ParamKind::Number),
    ("min_pr_charge", ParamKind::Number),
    ("min_pr_mz", ParamKind::Number),
    ("missed_cleavages", ParamKind::Number),
    ("mod", ParamKind::List),
    ("mod_no_scoring", ParamKind::Str),
    ("mod_only", ParamKind::Bool),
    ("no_calibration", ParamKind::Bool),
    ("no_cut_after_mod", ParamKind::Str),
    ("no_decoy_channel", ParamKind::Bool),
    ("no_fr_selection", ParamKind::Bool),
    ("no_im_window", ParamKind::Bool),
    ("no_isotopes", ParamKind::Bool),
    ("no_lib_filter", ParamKind::Bool),
    ("no_main_report", ParamKind::Bool),
    ("no_maxlfq", ParamKind::Bool),
    ("no_norm", ParamKind::Bool),
    ("no_peptidoforms", ParamKind::Bool),
    ("no_prot_inf", ParamKind::Bool),
    ("no_quant_files", ParamKind::Bool),
    ("no_rt_window", ParamKind::Bool),
    ("no_stats", ParamKind::Bool),
    ("no_swissprot", ParamKind::Bool),
    ("original_mods", ParamKind::Bool),
    ("out", ParamKind::Str),
    ("out_lib", ParamKind::Str),
    ("out_lib_copy", ParamKind::Bool),
    ("out_measured_rt", ParamKind::Bool),
    ("peak_translation", ParamKind::Bool),
    ("peptidoforms", ParamKind::Bool),
    ("pg_level", ParamKind::Str),
    ("pr_filter", ParamKind::Str),
    ("predict_n_frag", ParamKind::Str),
    ("predictor", ParamKind::Bool),
    ("ptm_qvalues", ParamKind::Bool),
    ("quant_acc", ParamKind::Str),
    ("quant_fr", ParamKind::Str),
    ("quant_no_ms1", ParamKind::Bool),
    ("quant_sel_runs", ParamKind::Str),
    ("quant_train_runs", ParamKind::Str),
    ("quick_mass_acc", ParamKind::Bool),
    ("qvalue", ParamKind::Number),
    ("reanalyse", ParamKind::Bool),
    ("reannotate", ParamKind::Bool),
    ("ref", ParamKind::Str),
    ("regular_swath", ParamKind::Bool),
    ("relaxed_prot_inf", ParamKind::Bool),
    ("report_lib_info", ParamKind::Bool),
    ("restrict_fr", ParamKind::Bool),
    ("scanning_swath", ParamKind::Bool),
    ("semi", ParamKind::Bool),
    ("skip_unknown_mods", ParamKind::Bool),
    ("smart_profiling", ParamKind::Bool),
    ("species_genes", ParamKind::Bool),
    ("species_ids", ParamKind::Bool),
    ("sptxt_acc", ParamKind::Str),
    ("tag_to_ids", ParamKind::Str),
    ("temp", ParamKind::Str),
    ("threads", ParamKind::Number),
    ("tims_min_int", ParamKind::Str),
    ("tims_ms1_cycle", ParamKind::Str),
    ("tims_scan", ParamKind::Bool),
    ("tims_skip_errors", ParamKind::Bool),
    ("unimod", ParamKind::List),
    ("use_quant", ParamKind::Bool),
    ("var_mod", ParamKind::List),
    ("var_mods", ParamKind::Number),
    ("verbose", ParamKind::Number),
    ("window", ParamKind::Str),
    ("xic", ParamKind::Str),
    ("xic_theoretical_fr", ParamKind::Bool),
];

/// Keys whose values are file paths; log replay keeps only the basename.
pub const PATH_KEYS: &[&str] = &["f", "fasta", "lib", "lib_fixed_mod", "out", "out_lib", "temp"];

pub fn kind_of(key: &str) -> Option<ParamKind> {
    VOCABULARY
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
}

/// `fixed_mod` -> `--fixed-mod`.
pub fn flag(key: &str) -> String {
    format!("--{}", key.replace('_', "-"))
}

pub fn is_path_key(key: &str) -> bool {
    PATH_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<_> = VOCABULARY.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), VOCABULARY.len());
    }

    #[test]
    fn test_control_keys_are_not_engine_flags() {
        for key in ["prefix", "diann_path", "cat_ready", "cat_total_files", "cat_file_auto"] {
            assert!(kind_of(key).is_none(), "{} leaked into the vocabulary", key);
        }
    }

    #[test]
    fn test_lookup_and_flag() {
        assert_eq!(kind_of("f"), Some(ParamKind::List));
        assert_eq!(kind_of("qvalue"), Some(ParamKind::Number));
        assert_eq!(kind_of("gen_spec_lib"), Some(ParamKind::Bool));
        assert_eq!(kind_of("out_lib"), Some(ParamKind::Str));
        assert_eq!(flag("out_lib"), "--out-lib");
        assert_eq!(flag("f"), "--f");
        assert!(PATH_KEYS.iter().all(|k| kind_of(k).is_some()));
    }
}
