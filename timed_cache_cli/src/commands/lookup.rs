use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use timed_cache::CacheConfig;

use crate::directory::{project_cache, DirectorySupplier, ProjectCaches};
use crate::output::{
    build_member_rows, missing_member_row, print_json, print_members_table, OutputFormat,
};

#[derive(Args)]
pub struct LookupArgs {
    /// Directory file (YAML, or JSON with a .json extension)
    #[arg(long)]
    pub directory: PathBuf,

    /// Project id
    #[arg(long)]
    pub project: String,

    /// Look up a single user instead of listing all members
    #[arg(long)]
    pub user: Option<String>,
}

pub fn run(args: &LookupArgs, config: &CacheConfig, format: &OutputFormat) -> Result<()> {
    let supplier = Arc::new(DirectorySupplier::new(&args.directory));
    let caches = ProjectCaches::new();
    let members = project_cache(&caches, &supplier, config, &args.project)?;

    let rows = match &args.user {
        Some(user) => match members.get(user.as_str())? {
            Some(role) => build_member_rows(&args.project, [(user, &role)]),
            None => vec![missing_member_row(&args.project, user)],
        },
        None => build_member_rows(&args.project, members.get_all()?.iter()),
    };

    if rows.is_empty() {
        eprintln!("Project {} has no members", args.project);
    }

    match format {
        OutputFormat::Table => print_members_table(&rows),
        OutputFormat::Json => print_json(&rows),
    }
    Ok(())
}
