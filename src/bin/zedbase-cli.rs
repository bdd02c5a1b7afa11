//! Command-line front-end over a zedbase index.
//!
//! Runs against the bundled in-memory store, so it is a demonstration
//! surface for the API rather than a persistent tool; point the library at a
//! real ordered store for durable use.

use std::env;
use std::process;
use std::sync::Arc;
use zedbase::{Client, IndexConfig, MemoryStore, Point, Range, Result, ZedbaseError};

const TABLE: &str = "sample";
const SPLIT_THRESHOLD: u64 = 10;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let store = Arc::new(MemoryStore::new());
    let config = IndexConfig::new(TABLE).with_split_threshold(SPLIT_THRESHOLD);
    let mut client = Client::open(store, config)?;

    match args.first().map(String::as_str) {
        Some("put") => {
            let x = parse_coord(args.get(1), "x")?;
            let y = parse_coord(args.get(2), "y")?;
            let id = match args.get(3) {
                Some(raw) => raw.parse::<i64>().map_err(|_| {
                    ZedbaseError::InvalidArgument(format!("id must be an integer, got {}", raw))
                })?,
                None => rand::random::<i32>() as i64,
            };
            client.insert(&Point::new(id, x, y))?;
        }
        Some("get") => {
            let x = parse_coord(args.get(1), "x")?;
            let y = parse_coord(args.get(2), "y")?;
            for point in client.get(x, y)? {
                println!("{}", point);
            }
        }
        Some("count") => {
            let xmin = parse_coord(args.get(1), "xmin")?;
            let ymin = parse_coord(args.get(2), "ymin")?;
            let xmax = parse_coord(args.get(3), "xmax")?;
            let ymax = parse_coord(args.get(4), "ymax")?;
            println!("Query Region: [({},{}), ({},{})]", xmin, ymin, xmax, ymax);
            let rx = Range::new(xmin as i64, xmax as i64)?;
            let ry = Range::new(ymin as i64, ymax as i64)?;
            let points = client.range_query(&rx, &ry)?;
            println!("{} hits", points.len());
        }
        Some("index") => {
            println!("bucket name: size");
            for entry in client.index().entries()? {
                println!("{}: {}", entry.key, entry.size);
            }
        }
        Some("drop") => {
            client.index().drop_tables()?;
            client.close()?;
        }
        _ => print_help(),
    }

    Ok(())
}

fn parse_coord(raw: Option<&String>, name: &str) -> Result<u32> {
    let raw = raw.ok_or_else(|| {
        ZedbaseError::InvalidArgument(format!("missing argument: {}", name))
    })?;
    raw.parse::<u32>().map_err(|_| {
        ZedbaseError::InvalidArgument(format!(
            "{} must be a non-negative 32-bit integer, got {}",
            name, raw
        ))
    })
}

fn print_help() {
    println!("Usage:");
    println!(" put x y [id]\tput an entity at (x,y)");
    println!(" get x y\tget points at (x,y)");
    println!(" count xmin ymin xmax ymax\tcount points within region [(xmin,ymin),(xmax,ymax)]");
    println!(" index\tshow the index entries");
    println!(" drop\tdrop tables");
}
