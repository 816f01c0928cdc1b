use sovran_experiments::{
    ExperimentKind, ExperimentState, ExperimentStore, Snapshot, Storable, TotalFloat,
};
use tracing_subscriber::EnvFilter;

/// Simulates a game loop that reads its tunables every frame
fn render_frame(snapshot: &Snapshot) -> String {
    let title = snapshot.string("Untitled", "title");
    let enemies = snapshot.value(4u32, "enemies", 0..=32);
    let gravity = snapshot.value(9.81f64, "gravity", 0.0..=30.0);
    let bloom = snapshot.value(0.35f32, "bloom", 0.0..=1.0);
    format!(
        "{} | enemies={} gravity={:.2} bloom={:.2}",
        title, enemies, gravity, bloom
    )
}

/// Renders one editor row without knowing the experiment's concrete type
fn describe(state: &ExperimentState) -> String {
    let shape = match &state.kind {
        ExperimentKind::String => "text".to_string(),
        ExperimentKind::Integer(range) | ExperimentKind::Float(range) => {
            format!("{:?}..={:?} ({})", range.low(), range.high(), range.numeric_type().name())
        }
    };
    let marker = if state.overridden { "*" } else { " " };
    format!("{}{:<10} {:<24} = {:?}", marker, format!("{:?}", state.key), shape, state.value)
}

/// Picks the next value an editor would offer for an experiment
fn next_value(state: &ExperimentState) -> Option<Storable> {
    match &state.kind {
        ExperimentKind::String => Some(Storable::from("Tuned!")),
        ExperimentKind::Integer(range) => range.recover::<u32>().and_then(|range| {
            let current = state.value.unwrap_as::<u32>()?;
            Some(Storable::new((current + 4).min(*range.end())))
        }),
        ExperimentKind::Float(range) => {
            if let Some(range) = range.recover::<f64>() {
                let current = state.value.downcast_ref::<TotalFloat<f64>>()?;
                Some(Storable::from((current.get() * 0.5).max(*range.start())))
            } else if let Some(range) = range.recover::<f32>() {
                let current = state.value.downcast_ref::<TotalFloat<f32>>()?;
                Some(Storable::from((current.get() + 0.25).min(*range.end())))
            } else {
                None
            }
        }
    }
}

fn nudge(store: &ExperimentStore, state: &ExperimentState) {
    if let Some(value) = next_value(state) {
        if state.kind.range().map_or(true, |range| range.contains(&value)) {
            store.set_raw(state.key.clone(), Some(value));
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = ExperimentStore::shared();

    println!("Frame 1: {}", render_frame(&store.snapshot()));

    println!("\nEditor:");
    for state in store.experiment_states() {
        println!("  {}", describe(&state));
    }

    for state in store.experiment_states() {
        nudge(store, &state);
    }

    println!("\nFrame 2: {}", render_frame(&store.snapshot()));

    println!("\nEditor after tuning:");
    for state in store.experiment_states() {
        println!("  {}", describe(&state));
    }

    store.reset_all_values();
    println!("\nAfter reset: {}", render_frame(&store.snapshot()));
}
