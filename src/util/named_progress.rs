use indicatif::ProgressStyle;

pub trait NamedProgress {
    fn named_spinner(name: &str) -> Self;
}

impl NamedProgress for ProgressStyle {
    /// A spinner for searches without a useful upper bound: attempts so far and attempt rate.
    fn named_spinner(name: &str) -> Self {
        let fmt = name.to_string();
        let fmt = fmt + " {spinner} {human_pos} attempts [{elapsed_precise}, {per_sec}] {msg}";
        ProgressStyle::default_spinner()
            .template(&fmt)
            .unwrap_or(ProgressStyle::default_spinner())
    }
}
