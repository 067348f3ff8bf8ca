//! Archive fixtures shared by installer and route tests.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn manifest_json(id: &str, entry_file: &str) -> String {
    serde_json::json!({
        "id": id,
        "name": "Modern Minimal",
        "version": "1.0.0",
        "category": "professional",
        "entryFile": entry_file,
        "features": ["responsive", "dark-mode"],
    })
    .to_string()
}

/// In-memory zip builder.
#[derive(Default)]
pub struct ZipFixture {
    files: Vec<(String, Vec<u8>)>,
}

impl ZipFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.push((name.to_string(), content.as_ref().to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in &self.files {
            zip.start_file(name.as_str(), SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}
