use std::path::PathBuf;
use std::time::Instant;

use chatty_tts::{
    engines::kokoro::KokoroEngine, ModelFiles, SynthesisEngine, SynthesisParams,
    SynthesisResult,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut engine = KokoroEngine::new();
    let files = ModelFiles {
        model: PathBuf::from("models/kokoro/kokoro-v1.0.onnx"),
        voices: PathBuf::from("models/kokoro/voices-v1.0.bin"),
    };

    let load_start = Instant::now();
    engine.load_model(&files)?;
    println!("Model loaded in {:.2?}", load_start.elapsed());

    println!("Available voices: {:?}", engine.list_voices());

    let text = "Hello! This is the streaming engine. \
                Each sentence is synthesized on its own. \
                The first one can play while the rest are still being generated.";

    let params = SynthesisParams {
        voice: "af_heart".to_string(),
        ..Default::default()
    };

    let synth_start = Instant::now();
    let mut samples = Vec::new();
    let mut sample_rate = 0;
    for (i, chunk) in engine.synthesize_stream(text, &params)?.enumerate() {
        let chunk = chunk?;
        println!(
            "Chunk {} ready after {:.2?} ({} samples)",
            i + 1,
            synth_start.elapsed(),
            chunk.samples.len()
        );
        sample_rate = chunk.sample_rate;
        samples.extend(chunk.samples);
    }

    let result = SynthesisResult {
        samples,
        sample_rate,
    };
    let speedup = result.duration_secs() / synth_start.elapsed().as_secs_f64();
    println!("Synthesized {} ({:.1}x real-time)", result.describe(), speedup);

    result.write_wav(&PathBuf::from("output.wav"))?;
    println!("Saved to output.wav");

    engine.unload_model();
    Ok(())
}
