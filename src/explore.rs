use log::{error, info, warn};
use std::sync::Arc;
use text_io::try_read;
use tree_explore::counters;
use tree_explore::simulation::corridor::{thrusts, Corridor, RunnerState, Thrust};
use tree_explore::sink::NullSink;
use tree_explore::tree::{render_tree, TreeView};
use tree_explore::{Node, NodeRef, SearchConfig, Termination, WorkerPool};

const MAX_SPEED: i32 = 3;

fn load_config() -> SearchConfig {
    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => return SearchConfig::default(),
    };
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            error!("Could not read {}: {}, using defaults", path, e);
            return SearchConfig::default();
        }
    };
    match SearchConfig::from_json(&text) {
        Ok(c) => c,
        Err(e) => {
            error!("Bad config in {}: {}, using defaults", path, e);
            SearchConfig::default()
        }
    }
}

fn run_stages(
    config: &SearchConfig,
    pool: &mut WorkerPool<Thrust, RunnerState>,
    root: &NodeRef<Thrust, RunnerState>,
    stages: &[Termination],
) -> NodeRef<Thrust, RunnerState> {
    let mut from = root.clone();
    for termination in stages {
        let mut stage = config.stage::<Thrust, RunnerState>(termination.clone(), Box::new(NullSink));
        match stage.run(pool.workers_mut(), &from) {
            Ok(results) => {
                println!(
                    "{:?}: {} episodes in {:?}, {} nodes returned",
                    termination,
                    results.episodes_played,
                    results.elapsed,
                    results.nodes.len()
                );
                match results.nodes.into_iter().next() {
                    Some(next) => from = next,
                    None => {
                        warn!("Stage returned no nodes, later stages start from the same node");
                    }
                }
            }
            Err(e) => {
                error!("Stage failed: {}", e);
                break;
            }
        }
    }
    from
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    counters::reset();

    let config = load_config();
    let spawned =
        WorkerPool::<Thrust, RunnerState>::new(config.workers, |_| Box::new(Corridor::new(MAX_SPEED)));
    let mut pool = match spawned {
        Ok(p) => p,
        Err(e) => {
            error!("Could not start workers: {}", e);
            std::process::exit(1);
        }
    };
    let root = Node::new_root(Corridor::initial_state(), Arc::new(thrusts()));
    info!("Initialised {} workers", pool.len());

    let mut current = run_stages(&config, &mut pool, &root, &config.stages);
    println!("{}", counters::global());

    loop {
        let token: String = match try_read!() {
            Ok(t) => t,
            Err(_) => break,
        };
        match token.as_str() {
            "exit" | "quit" => break,
            "run" => match try_read!() {
                Ok(episodes) => {
                    let stage = [Termination::FixedEpisodes { episodes }];
                    current = run_stages(&config, &mut pool, &current, &stage);
                }
                Err(e) => println!("run <episodes>: {}", e),
            },
            "root" => current = root.clone(),
            "tree" => match try_read!() {
                Ok(depth) => print!("{}", render_tree(&current, depth)),
                Err(e) => println!("tree <depth>: {}", e),
            },
            "dot" => match try_read!() {
                Ok(depth) => println!("{}", TreeView::capture(&current, Some(depth)).to_dot()),
                Err(e) => println!("dot <depth>: {}", e),
            },
            "stats" => {
                println!("{}", counters::global());
                println!(
                    "current node at depth {} with {} descendants, fully explored: {}",
                    current.tree_depth(),
                    current.descendant_count(),
                    current.is_fully_explored()
                );
            }
            _ => println!("unknown command {}", token),
        }
    }
    pool.terminate_all();
}
