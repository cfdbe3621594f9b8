// 👤 Guardian extraction
// Pulls the legal representative out of free text:
//   R.Legal: Nombre Apellido   Cedula: 8-xxx-xxxx

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static GUARDIAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)R\.Legal:\s*([A-Za-zÁÉÍÓÚÑ ]+?)\s+Cedula:\s*([0-9-]+)").unwrap()
});

/// Guardian - legal representative shared by every record of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub name: String,
    pub id: String,
}

impl Guardian {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.id.is_empty()
    }
}

/// Extract the first guardian found in `text`
///
/// No match gives an empty Guardian. Later occurrences are ignored.
pub fn extract_guardian(text: &str) -> Guardian {
    let text = text.replace('\t', " ");

    match GUARDIAN.captures(&text) {
        Some(caps) => Guardian {
            name: collapse_whitespace(&caps[1]).to_uppercase(),
            id: caps[2].to_string(),
        },
        None => Guardian::default(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
