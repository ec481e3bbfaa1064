use anyhow::Result;
use clap::Parser;
use levels::{TIERS, classify, progress};
use serde_json::json;

/// Prints the tier table and progress for point totals, one JSON document per line.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Point totals to classify, negatives count as zero.
    #[arg(allow_negative_numbers = true)]
    points: Vec<i64>,

    /// Print the tier table first.
    #[arg(long)]
    table: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.table || args.points.is_empty() {
        for tier in TIERS {
            let row = json!({
                "order": tier.order(),
                "name": tier.name(),
                "min_points": tier.min_points,
                "max_points": tier.max_points(),
                "badge": tier.level.badge(),
            });
            println!("{}", serde_json::to_string(&row)?);
        }
    }

    for points in args.points {
        let row = json!({
            "points": points,
            "level": classify(points),
            "progress": progress(points),
        });
        println!("{}", serde_json::to_string(&row)?);
    }

    Ok(())
}
