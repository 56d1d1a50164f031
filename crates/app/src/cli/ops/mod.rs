pub mod account;
pub mod files;
pub mod init;
pub mod listing;
pub mod share;
pub mod trash;
pub mod version;

pub use account::Account;
pub use files::{Cp, Get, Link, Mkdir, Mv, Put, Rename, Rm};
pub use init::Init;
pub use listing::{Find, Info, Ls, Tree};
pub use share::Share;
pub use trash::Trash;
pub use version::Version;

use common::tree::Node;

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// `1536` renders as `1.5 KiB`.
pub(crate) fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// One line per node: id, kind, size, name.
pub(crate) fn format_node(node: &Node) -> String {
    let size = if node.is_file() {
        format_size(node.size)
    } else {
        "-".to_string()
    };
    let name = if node.is_folder() {
        format!("{}/", node.name)
    } else {
        node.name.clone()
    };
    format!("{:>8}  {:<6}  {:>10}  {}", node.id, node.kind.as_str(), size, name)
}

pub(crate) fn format_nodes(nodes: &[Node], empty: &str) -> String {
    if nodes.is_empty() {
        return empty.to_string();
    }
    nodes
        .iter()
        .map(format_node)
        .collect::<Vec<_>>()
        .join("\n")
}
