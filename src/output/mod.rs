mod report;
mod styling;
mod tables;

pub use report::{print_report, AnomalyReport};
pub use styling::{dim, magenta_bold};

/// Prints the banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🔍 ocpci-logreduce"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("OpenShift CI event anomaly detection")
    );
}
