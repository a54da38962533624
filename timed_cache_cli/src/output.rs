use serde::Serialize;
use tabled::{Table, Tabled};
use timed_cache::RefreshSummary;

#[derive(Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled, Serialize, Debug, Clone, PartialEq)]
pub struct MemberRow {
    #[tabled(rename = "Project")]
    #[serde(rename = "Project")]
    pub project: String,
    #[tabled(rename = "User")]
    #[serde(rename = "User")]
    pub user: String,
    #[tabled(rename = "Role")]
    #[serde(rename = "Role")]
    pub role: String,
}

#[derive(Tabled, Serialize, Debug, Clone, PartialEq)]
pub struct ProjectStatsRow {
    #[tabled(rename = "Project")]
    pub project: String,
    #[tabled(rename = "Members")]
    pub members: usize,
    #[tabled(rename = "Refreshes")]
    pub refreshes_started: u64,
    #[tabled(rename = "Succeeded")]
    pub refreshes_succeeded: u64,
    #[tabled(rename = "Failed")]
    pub refreshes_failed: u64,
    #[tabled(rename = "Superseded")]
    pub commits_superseded: u64,
    #[tabled(rename = "Busy")]
    pub slot_unavailable: u64,
    #[tabled(rename = "Replayed")]
    pub errors_replayed: u64,
    #[tabled(rename = "Stale")]
    pub stale: bool,
}

/// Reader-side counters of a stress run.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub reads: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl ReadOutcome {
    pub fn merge(&mut self, other: &ReadOutcome) {
        self.reads += other.reads;
        self.hits += other.hits;
        self.misses += other.misses;
        self.errors += other.errors;
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct StressReport {
    pub elapsed_ms: u64,
    pub readers: usize,
    pub reads: ReadOutcome,
    pub projects: Vec<ProjectStatsRow>,
    pub totals: RefreshSummary,
}

// -- Row builders --

/// One row per member, sorted by user id. A lookup of a single user that is
/// not a member yields a row with role `-`.
pub fn build_member_rows<'a>(
    project: &str,
    members: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Vec<MemberRow> {
    let mut rows: Vec<MemberRow> = members
        .into_iter()
        .map(|(user, role)| MemberRow {
            project: project.to_string(),
            user: user.clone(),
            role: role.clone(),
        })
        .collect();
    rows.sort_by(|a, b| a.user.cmp(&b.user));
    rows
}

pub fn missing_member_row(project: &str, user: &str) -> MemberRow {
    MemberRow {
        project: project.to_string(),
        user: user.to_string(),
        role: "-".to_string(),
    }
}

pub fn build_project_stats_row(
    project: &str,
    members: usize,
    stats: &RefreshSummary,
    stale: bool,
) -> ProjectStatsRow {
    ProjectStatsRow {
        project: project.to_string(),
        members,
        refreshes_started: stats.refreshes_started,
        refreshes_succeeded: stats.refreshes_succeeded,
        refreshes_failed: stats.refreshes_failed,
        commits_superseded: stats.commits_superseded,
        slot_unavailable: stats.slot_unavailable,
        errors_replayed: stats.errors_replayed,
        stale,
    }
}

// -- Table output --

pub fn print_members_table(rows: &[MemberRow]) {
    println!("{}", Table::new(rows));
}

pub fn print_report_table(report: &StressReport) {
    println!("{}", Table::new(&report.projects));
    println!(
        "{} reads by {} readers in {} ms: {} hits, {} misses, {} errors",
        report.reads.reads,
        report.readers,
        report.elapsed_ms,
        report.reads.hits,
        report.reads.misses,
        report.reads.errors
    );
}

// -- JSON output --

pub fn print_json<T: serde::Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}
