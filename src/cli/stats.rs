use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::database_ops::{RecordFilter, Store, StoreStats};

#[derive(Args, Debug, Default, Clone)]
pub struct StatsArgs {
    /// Also list the most recently captured listings
    #[arg(long)]
    pub recent: Option<i64>,
    /// Restrict the recent listing to one source id
    #[arg(long)]
    pub source: Option<String>,
    /// Emit JSON instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct RecentRow {
    id: Option<i64>,
    source_id: String,
    title: String,
    showtime: String,
    enriched: bool,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    #[serde(flatten)]
    stats: StoreStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    recent: Vec<RecentRow>,
}

pub async fn run<St: Store + ?Sized>(store: &St, args: &StatsArgs) -> Result<()> {
    print!("{}", render(store, args).await?);
    Ok(())
}

pub async fn render<St: Store + ?Sized>(store: &St, args: &StatsArgs) -> Result<String> {
    let stats = store.stats().await?;
    let mut recent = Vec::new();
    if let Some(n) = args.recent.filter(|n| *n > 0) {
        let mut filter = RecordFilter::new().limit(Some(n));
        if let Some(source) = &args.source {
            filter = filter.source(source.clone());
        }
        recent = store
            .select(&filter)
            .await?
            .into_iter()
            .map(|r| RecentRow {
                id: r.id,
                showtime: r.showtime().normalized(),
                enriched: r.is_enriched(),
                source_id: r.source_id,
                title: r.title,
            })
            .collect();
    }
    let report = StatsReport { stats, recent };

    if args.json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&report)?));
    }
    let mut out = String::new();
    out.push_str(&format!("listings:         {}\n", report.stats.total_records));
    out.push_str(&format!("current capture:  {}\n", report.stats.current_records));
    out.push_str(&format!("enriched:         {}\n", report.stats.enriched_records));
    let last = report
        .stats
        .last_capture
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".into());
    out.push_str(&format!("last capture:     {last}\n"));
    if !report.recent.is_empty() {
        out.push_str("\nrecent:\n");
        for row in &report.recent {
            out.push_str(&format!(
                "  [{}] {:<14} {} | {}{}\n",
                row.id.unwrap_or_default(),
                row.source_id,
                row.title,
                row.showtime,
                if row.enriched { " *" } else { "" }
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::database_ops::memory::MemoryStore;
    use crate::model::{RawListing, Venue};
    use chrono::{TimeZone, Utc};

    async fn store_with(titles: &[(&str, &str)]) -> MemoryStore {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        for (source, title) in titles {
            let venue = Venue {
                source_id: source.to_string(),
                display_name: source.to_string(),
                location: String::new(),
                website: String::new(),
            };
            let rec = canonicalize(&RawListing::new(*title, "2025-01-10 (19:00)"), &venue, at).unwrap();
            store.upsert(&rec).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn text_report_counts_and_recent_rows() {
        let store = store_with(&[("metrograph", "Anora"), ("ifc_center", "The Brutalist")]).await;
        let out = render(
            &store,
            &StatsArgs {
                recent: Some(5),
                source: Some("ifc_center".into()),
                json: false,
            },
        )
        .await
        .unwrap();
        assert!(out.contains("listings:         2"));
        assert!(out.contains("The Brutalist"));
        assert!(!out.contains("Anora"));
    }

    #[tokio::test]
    async fn json_report_omits_empty_recent() {
        let store = store_with(&[("metrograph", "Anora")]).await;
        let out = render(&store, &StatsArgs { json: true, ..Default::default() }).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["total_records"], 1);
        assert!(value.get("recent").is_none());
    }
}
