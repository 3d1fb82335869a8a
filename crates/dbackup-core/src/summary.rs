use tracing::info;

use crate::change::FileOp;

/// Per-run tally of what backup did, for human-readable output.
/// Paths are recorded in visit order and not de-duplicated.
#[derive(Debug, Default)]
pub struct Summary {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl Summary {
    pub fn record(&mut self, path: &str, op: FileOp) {
        match op {
            FileOp::Add => self.added.push(path.to_string()),
            FileOp::Change => self.changed.push(path.to_string()),
            FileOp::Remove => self.removed.push(path.to_string()),
            FileOp::None => {}
        }
    }

    pub fn print(&self) {
        print_section("added", &self.added);
        print_section("changed", &self.changed);
        print_section("removed", &self.removed);
    }
}

fn print_section(label: &str, files: &[String]) {
    if files.is_empty() {
        info!("No files {label}");
        return;
    }
    info!("Files {label}:");
    for file in files {
        info!("  {file}");
    }
}
