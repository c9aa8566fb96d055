use std::env;
use std::fs::File;
use std::io::{Read, Write};
use std::time::Instant;

use jvm_method_tracer::{TracepointRegistry, TracerConfig, Transformer};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const USAGE: &str = "usage: trace_jar CONFIG_YAML JAR_PATH [OUT_JAR]";

/// Internal class name of a `.class` entry. Entries of a multi-release jar
/// under `META-INF/versions/N/` name the same class as the base entry.
fn class_name(entry: &str) -> Option<&str> {
    let name = entry.strip_suffix(".class")?;
    let versioned = name
        .strip_prefix("META-INF/versions/")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(version, _)| !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()));
    match versioned {
        Some((_, class)) => Some(class),
        None => Some(name),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args().skip(1);
    let config_path = args.next().ok_or(USAGE)?;
    let jar_path = args.next().ok_or(USAGE)?;
    let out_path = args.next();

    let config = TracerConfig::from_file(&config_path)?;
    let registry = TracepointRegistry::from_config(&config)?;
    let transformer = Transformer::new(registry).with_hooks(config.hooks.clone());

    let mut zip = ZipArchive::new(File::open(&jar_path)?)?;
    let mut out = match &out_path {
        Some(path) => Some(ZipWriter::new(File::create(path)?)),
        None => None,
    };

    let mut class_files: u64 = 0;
    let mut rewritten: u64 = 0;
    let mut failed: u64 = 0;
    let mut total_bytes: u64 = 0;

    let start = Instant::now();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        let options = FileOptions::default().compression_method(entry.compression());
        if entry.is_dir() {
            if let Some(out) = out.as_mut() {
                out.add_directory(name, options)?;
            }
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        let bytes = match class_name(&name) {
            Some(class_name) => {
                class_files += 1;
                total_bytes += bytes.len() as u64;
                match transformer.transform(class_name, &bytes) {
                    Ok(outcome) => {
                        if !outcome.is_unchanged() {
                            rewritten += 1;
                        }
                        outcome.into_bytes(&bytes)
                    }
                    // already reported through the log sink
                    Err(_) => {
                        failed += 1;
                        bytes
                    }
                }
            }
            None => bytes,
        };

        if let Some(out) = out.as_mut() {
            out.start_file(name, options)?;
            out.write_all(&bytes)?;
        }
    }
    if let Some(mut out) = out {
        out.finish()?;
    }
    let dur = start.elapsed();

    let secs = dur.as_secs_f64();
    let mb = total_bytes as f64 / (1024.0 * 1024.0);
    let ns_per = if class_files > 0 { (dur.as_nanos() as f64) / (class_files as f64) } else { 0.0 };

    println!("jar_path={}", jar_path);
    if let Some(path) = &out_path {
        println!("out_path={}", path);
    }
    println!("class_files={}", class_files);
    println!("rewritten={} failed={}", rewritten, failed);
    println!("hooks={}", transformer.hooks().owner);
    println!("tracepoints={}", transformer.policy().len());
    println!("total_mb={:.3}", mb);
    println!("transform_time_ms={:.3}", secs * 1000.0);
    println!("ns_per_class={:.1}", ns_per);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::class_name;

    #[test]
    fn class_names_from_entries() {
        assert_eq!(class_name("com/example/Calc.class"), Some("com/example/Calc"));
        assert_eq!(class_name("META-INF/versions/9/com/example/Calc.class"), Some("com/example/Calc"));
        assert_eq!(class_name("META-INF/versions/21/module-info.class"), Some("module-info"));
        assert_eq!(class_name("META-INF/versions/x/Odd.class"), Some("META-INF/versions/x/Odd"));
        assert_eq!(class_name("META-INF/MANIFEST.MF"), None);
    }
}
