//! Pool system demo
//!
//! Loads pool settings, then plays a scripted session against a headless
//! host: a field level, a boss level loaded on top of it, and both unloaded
//! again. Each frame fires bullets, breaks asteroids and recycles what the
//! previous frames spawned.
//!
//! Run with `RUST_LOG=debug` to see every instance being recycled.

use pool_system::foundation::logging;
use pool_system::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use thiserror::Error;

const TEMPLATES: [&str; 4] = ["Bullet", "Spark", "Asteroid", "BossShield"];
const FRAMES_PER_STEP: usize = 30;

#[derive(Debug, Error)]
enum DemoError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Template '{0}' is missing from the host")]
    MissingTemplate(&'static str),

    #[error("Pool system was not initialized")]
    NotInitialized,
}

/// One step of the scripted session
enum Step {
    Load(&'static str, LoadMode),
    Unload(&'static str),
    Play,
}

const SCRIPT: [Step; 6] = [
    Step::Load("Assets/Levels/Field.scene", LoadMode::Single),
    Step::Play,
    Step::Load("Assets/Levels/Boss.scene", LoadMode::Additive),
    Step::Play,
    Step::Unload("Assets/Levels/Field.scene"),
    Step::Unload("Assets/Levels/Boss.scene"),
];

struct Session {
    host: MemoryHost,
    rng: StdRng,
    templates: Vec<ObjectHandle>,
    in_flight: Vec<ObjectHandle>,
}

impl Session {
    fn new() -> Self {
        let mut host = MemoryHost::new();
        let templates = TEMPLATES
            .iter()
            .map(|name| {
                let template = host.create_object(name);
                host.add_component(template, &["OnSpawn", "OnDespawn"]);
                template
            })
            .collect();

        Self {
            host,
            rng: StdRng::seed_from_u64(7),
            templates,
            in_flight: Vec::new(),
        }
    }

    fn template(&self, name: &'static str) -> Result<ObjectHandle, DemoError> {
        self.host.find_root(name).ok_or(DemoError::MissingTemplate(name))
    }

    fn play(&mut self, system: &mut PoolSystem) -> Result<(), DemoError> {
        for _ in 0..FRAMES_PER_STEP {
            let template = self.templates[self.rng.gen_range(0..self.templates.len())];
            let position = Vec3::new(self.rng.gen_range(-50.0..50.0), 0.0, self.rng.gen_range(-50.0..50.0));

            match system.spawn(&mut self.host, template, None, Placement::at(position, Quat::identity())) {
                Ok(Some(instance)) => self.in_flight.push(instance),
                Ok(None) => log::debug!("No instance available for {}", self.host.name(template)),
                Err(err) => log::warn!("Spawn failed: {err}"),
            }

            let returning = self.rng.gen_range(0..=self.in_flight.len().min(3));
            for _ in 0..returning {
                let index = self.rng.gen_range(0..self.in_flight.len());
                let instance = self.in_flight.swap_remove(index);
                system.despawn(&mut self.host, instance);
            }
        }
        Ok(())
    }

    fn report(&self, system: &PoolSystem) {
        for pool in system.pools() {
            let stats = pool.stats();
            log::info!(
                "  {:<12} free {:>3}  in use {:>3}  created {:>3}  destroyed {:>3}  peak {:>3}",
                pool.label(),
                pool.free_count(),
                pool.in_use_count(),
                stats.instantiated,
                stats.destroyed,
                stats.peak_live
            );
        }
        log::info!(
            "  host objects: {}, notifications delivered: {}",
            self.host.object_count(),
            self.host.delivered().len()
        );
    }
}

fn settings_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("settings.ron"), PathBuf::from)
}

fn main() -> Result<(), DemoError> {
    logging::init();

    let mut session = Session::new();
    let path = settings_path();
    log::info!("Loading pool settings from {}", path.display());
    let settings = PoolSystemSettings::load(&path, &session.host)?;

    global::initialize(settings, &mut session.host);
    let shield = session.template("BossShield")?;

    for step in &SCRIPT {
        global::with(|system| -> Result<(), DemoError> {
            match step {
                Step::Load(scene, mode) => system.on_scene_loaded(&mut session.host, &SceneId::from(*scene), *mode),
                Step::Unload(scene) => system.on_scene_unloaded(&mut session.host, &SceneId::from(*scene)),
                Step::Play => session.play(system)?,
            }
            if system.contains_pool(shield) {
                log::info!("Boss shield pool is up");
            }
            session.report(system);
            Ok(())
        })
        .ok_or(DemoError::NotInitialized)??;
    }

    // whatever is still flying goes back before teardown
    let in_flight = std::mem::take(&mut session.in_flight);
    global::with(|system| {
        for instance in in_flight {
            system.despawn(&mut session.host, instance);
        }
    });

    global::shutdown(&mut session.host);
    log::info!(
        "Done: {} instances created, {} destroyed, {} objects left",
        session.host.instantiated_count(),
        session.host.destroyed_count(),
        session.host.object_count()
    );
    Ok(())
}
