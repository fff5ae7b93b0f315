use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use webmarks::core::Mode;
use webmarks::menu::MenuTree;
use webmarks::parser;
use webmarks::search::SearchIndex;
use webmarks::store::BookmarkStore;

#[derive(Debug, Parser)]
#[command(
    name = "webmarks",
    about = "Bookmark-file tooling built on the webmarks crate",
    version
)]
struct Cli {
    /// Enable verbose output for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a bookmark file and print its structure.
    Parse(ParseArgs),

    /// Print the sorted menu projection of a bookmark file.
    Menu(MenuArgs),

    /// Query the search index of a bookmark file.
    Search(SearchArgs),

    /// Open one search result in a viewer.
    Open(OpenArgs),

    /// Reprint the projections whenever the file changes.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Bookmark file to parse.
    file: PathBuf,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct MenuArgs {
    /// Bookmark file to project.
    file: PathBuf,
}

#[derive(Debug, Args)]
struct SearchArgs {
    /// Bookmark file to index.
    file: PathBuf,
    /// Search terms; they concatenate into a single pattern.
    #[arg(required = true)]
    terms: Vec<String>,
    /// Emit JSON instead of a listing.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct OpenArgs {
    /// Bookmark file to index.
    file: PathBuf,
    /// Position of the entry in the flattened search set.
    position: usize,
    /// Viewer command the URL is appended to (default: xdg-open).
    #[arg(long)]
    viewer: Option<String>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// Bookmark file to keep projecting.
    file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    match cli.command {
        Commands::Parse(args) => handle_parse(args, verbose),
        Commands::Menu(args) => handle_menu(args, verbose),
        Commands::Search(args) => handle_search(args, verbose),
        Commands::Open(args) => handle_open(args, verbose),
        Commands::Watch(args) => handle_watch(args, verbose),
    }
}

fn handle_parse(args: ParseArgs, verbose: bool) -> Result<()> {
    let ParseArgs { file, json } = args;
    if verbose {
        eprintln!("Parsing {:?}", file);
    }
    let collection = parser::parse_file(&file).with_context(|| format!("parsing {:?}", file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&collection)?);
    } else {
        println!("{:#?}", collection);
    }
    if verbose {
        eprintln!("{}", summarize(&collection));
    }
    Ok(())
}

fn handle_menu(args: MenuArgs, verbose: bool) -> Result<()> {
    let MenuArgs { file } = args;
    let collection = parser::parse_file(&file).with_context(|| format!("parsing {:?}", file))?;
    if verbose {
        eprintln!("{}", summarize(&collection));
    }

    let tree = MenuTree::from_collection(&collection);
    if tree.root().is_empty() {
        eprintln!("No bookmark entries found in {:?}.", file);
        return Ok(());
    }
    print!("{}", tree.render());
    Ok(())
}

fn handle_search(args: SearchArgs, verbose: bool) -> Result<()> {
    let SearchArgs { file, terms, json } = args;
    let collection = parser::parse_file(&file).with_context(|| format!("parsing {:?}", file))?;
    let index = SearchIndex::from_collection(&collection);
    if verbose {
        eprintln!("Indexed {} entries", index.len());
    }

    let hits = index.matches(&terms);
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        eprintln!("No matches.");
        return Ok(());
    }
    for entry in hits {
        println!("{:>4}  {}  <{}>", entry.position, entry.name, entry.url);
    }
    Ok(())
}

fn handle_open(args: OpenArgs, verbose: bool) -> Result<()> {
    let OpenArgs {
        file,
        position,
        viewer,
    } = args;

    // Surface parse failures directly; the store would swallow them.
    let collection = parser::parse_file(&file).with_context(|| format!("parsing {:?}", file))?;
    if verbose {
        eprintln!("{}", summarize(&collection));
    }

    let mut store = BookmarkStore::init(&file, Mode::SEARCH)?;
    if let Some(viewer) = viewer.as_deref() {
        store = store.with_viewer(split_viewer(viewer));
    }

    if !store.activate(position) {
        anyhow::bail!("could not open search entry {position} of {:?}", file);
    }
    Ok(())
}

fn handle_watch(args: WatchArgs, verbose: bool) -> Result<()> {
    let WatchArgs { file } = args;
    let mut store = webmarks::enable(&file)?;

    print_projection(&store);
    loop {
        if !store.wait_for_change() {
            eprintln!("No live updates available for {:?}; exiting.", file);
            return Ok(());
        }
        if verbose {
            eprintln!("Change signal for {:?}; rebuilding", file);
        }
        store.rebuild()?;
        print_projection(&store);
    }
}

fn print_projection(store: &BookmarkStore) {
    let stamp = Local::now().format("%H:%M:%S");
    let indexed = store.index().map(|index| index.len()).unwrap_or(0);
    println!(
        "== {} — {} — {} searchable entries ==",
        stamp,
        summarize(store.collection()),
        indexed
    );
    if let Some(menu) = store.menu() {
        print!("{}", menu.render());
    }
}

fn summarize(collection: &webmarks::BookmarkCollection) -> String {
    format!(
        "{} groups, {} entries ({} ungrouped)",
        collection.groups.len(),
        collection.total_items(),
        collection.contents.len()
    )
}

fn split_viewer(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::{split_viewer, summarize};
    use webmarks::parser::parse_str;

    #[test]
    fn split_viewer_handles_flags() {
        assert_eq!(
            split_viewer("epiphany --new-tab"),
            vec!["epiphany".to_string(), "--new-tab".to_string()]
        );
        assert!(split_viewer("  ").is_empty());
    }

    #[test]
    fn summarize_counts_groups_and_ungrouped() {
        let collection = parse_str(
            "<root>\
             <item><title>a</title><link>u</link><subject>S</subject></item>\
             <item><title>b</title><link>v</link></item>\
             </root>",
        )
        .expect("parses");
        assert_eq!(summarize(&collection), "1 groups, 2 entries (1 ungrouped)");
    }
}
