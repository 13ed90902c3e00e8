use anyhow::Result;
use cuisto_store::logging::{self, LogConfig};
use tempfile::tempdir;

#[test]
fn file_sink_receives_json_events() -> Result<()> {
    let dir = tempdir()?;
    let config = LogConfig {
        file_dir: Some(dir.path().join("logs")),
        ..LogConfig::default()
    };
    let guard = logging::init(&config)?;
    tracing::info!(target: "cuisto", event = "probe", value = 7);
    drop(guard);

    let mut lines = Vec::new();
    for entry in std::fs::read_dir(dir.path().join("logs"))? {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        assert!(name.is_some_and(|n| n.starts_with("cuisto.log")));
        lines.extend(std::fs::read_to_string(&path)?.lines().map(str::to_string));
    }
    let probe = lines
        .iter()
        .find(|line| line.contains("\"probe\""))
        .expect("probe event written");
    let value: serde_json::Value = serde_json::from_str(probe)?;
    assert_eq!(value["target"], "cuisto");
    assert_eq!(value["fields"]["value"], 7);

    // A global subscriber is already installed.
    assert!(logging::init(&LogConfig::default()).is_err());
    Ok(())
}
