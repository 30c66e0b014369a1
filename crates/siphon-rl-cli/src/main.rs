//! siphon-rl episode runner
//!
//! Connects to a running siphon tap, builds the environment and plays
//! episodes with a uniformly random policy. Useful for checking a tap
//! deployment end to end and for eyeballing reward scales before
//! training anything.
//!
//! Usage: `siphon-rl [config.json]`, where the file holds a [`RunConfig`]
//! with every field optional.

use anyhow::{Context, Result, bail};
use rand::Rng;
use rand::rngs::ThreadRng;
use serde::Deserialize;
use siphon_bridge::{SiphonClient, SiphonClientConfig};
use siphon_rl_core::{ActionSpace, AgentAction};
use siphon_rl_env::{EnvConfig, GameInterface, SiphonEnv};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Everything one run needs, loadable from a single JSON file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RunConfig {
    /// Episodes to play before exiting
    episodes: u32,
    /// Tap connection settings
    client: SiphonClientConfig,
    /// Environment settings
    env: EnvConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            episodes: 1,
            client: SiphonClientConfig::default(),
            env: EnvConfig::default(),
        }
    }
}

fn sample_action(space: &ActionSpace, rng: &mut ThreadRng) -> AgentAction {
    match space {
        ActionSpace::Discrete { .. } => AgentAction::Discrete(rng.gen_range(0..space.size())),
        ActionSpace::MultiBinary { .. } => AgentAction::MultiBinary(
            (0..space.size()).map(|_| rng.gen_bool(0.5) as u8).collect(),
        ),
    }
}

/// Plays one episode to its end. Episode-poisoning faults (transport,
/// timeout, pipeline) abort the episode and let the run move on; caller
/// bugs like a bad action surface as hard errors.
async fn run_episode<G: GameInterface>(
    env: &mut SiphonEnv<G>,
    rng: &mut ThreadRng,
    episode: u32,
) -> Result<()> {
    let (_, info) = env.reset().await?;
    debug!(
        episode,
        player_hp = info.player_hp,
        boss_hp = info.boss_hp,
        "episode start"
    );

    loop {
        let action = sample_action(env.action_space(), rng);
        match env.step(&action).await {
            Ok(result) => {
                debug!(
                    step = result.info.step,
                    reward = result.reward,
                    player_hp = result.info.player_hp,
                    boss_hp = result.info.boss_hp,
                    "step"
                );
                if result.terminated || result.truncated {
                    if let Some(summary) = result.info.episode {
                        info!(
                            episode,
                            length = summary.length,
                            total_reward = summary.total_reward,
                            victory = summary.victory,
                            dealt = summary.boss_damage_dealt_normalized,
                            taken = summary.player_damage_taken_normalized,
                            "episode finished"
                        );
                    }
                    return Ok(());
                }
            }
            Err(err) if err.poisons_episode() => {
                warn!(episode, %err, "episode aborted");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = std::env::args().skip(1);
    let run = match (args.next(), args.next()) {
        (None, _) => RunConfig::default(),
        (Some(path), None) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read config {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parse config {path}"))?
        }
        (Some(_), Some(_)) => bail!("usage: siphon-rl [config.json]"),
    };

    info!(address = %run.client.address, episodes = run.episodes, "starting run");
    let client = SiphonClient::connect(run.client).await?;
    let mut env = SiphonEnv::new(client, run.env)?;

    let mut rng = rand::thread_rng();
    for episode in 1..=run.episodes {
        run_episode(&mut env, &mut rng, episode).await?;
    }

    env.close().await?;
    info!("run complete");
    Ok(())
}
