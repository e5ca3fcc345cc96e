use crate::model::{RosterEntry, Snapshot, Summary};
use anyhow::Context;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const SNAPSHOT_ENTRY: &str = "data/snapshot.json";
const SUMMARY_ENTRY: &str = "data/summary.csv";
pub const EXPORT_FORMAT_V1: &str = "rollcall-export-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

/// Writes the group's snapshot plus a per-person summary CSV into a zip.
pub fn export_group_bundle(
    group_key: &str,
    snapshot: &Snapshot,
    summaries: &[(RosterEntry, Summary)],
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot_json =
        serde_json::to_string_pretty(snapshot).context("failed to serialize snapshot")?;
    let digest = Sha256::digest(snapshot_json.as_bytes());
    let snapshot_sha256: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": EXPORT_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "groupKey": group_key,
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "rosterCount": snapshot.roster.len(),
        "dateCount": snapshot.attendance.len(),
        "snapshotSha256": snapshot_sha256,
    });
    let manifest_json =
        serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;

    let entries = [
        (MANIFEST_ENTRY, manifest_json),
        (SNAPSHOT_ENTRY, snapshot_json),
        (SUMMARY_ENTRY, summary_csv(summaries)),
    ];
    for (name, body) in &entries {
        zip.start_file(*name, opts)
            .with_context(|| format!("failed to start {name} entry"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write {name} entry"))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: EXPORT_FORMAT_V1.to_string(),
        entry_count: entries.len(),
    })
}

fn csv_field(s: &str) -> String {
    if s.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn summary_csv(summaries: &[(RosterEntry, Summary)]) -> String {
    let mut out = String::from("id,name,present,absent,late,total\n");
    for (entry, s) in summaries {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(&entry.id),
            csv_field(&entry.name),
            s.present,
            s.absent,
            s.late,
            s.total
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quotes_names_with_commas() {
        let rows = vec![(
            RosterEntry {
                id: "1".into(),
                name: "Cruz, Juan \"JC\"".into(),
                group_key: "6pm".into(),
            },
            Summary {
                present: 2,
                absent: 1,
                late: 0,
                total: 3,
            },
        )];
        assert_eq!(
            summary_csv(&rows),
            "id,name,present,absent,late,total\n1,\"Cruz, Juan \"\"JC\"\"\",2,1,0,3\n"
        );
    }

    #[test]
    fn entry_count_matches_the_archive() {
        let dir = std::env::temp_dir().join(format!(
            "rollcall-export-unit-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let out = dir.join("bundle.zip");
        let summary =
            export_group_bundle("8am", &Snapshot::default(), &[], &out).expect("export");
        let archive = zip::ZipArchive::new(File::open(&out).expect("open")).expect("zip");
        assert_eq!(summary.entry_count, archive.len());
        let _ = std::fs::remove_dir_all(dir);
    }
}
