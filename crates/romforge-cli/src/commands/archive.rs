//! Archive command implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use romforge_core::{Checksum, Container, ContainerLayout};
use tracing::info;

use crate::cli::{ArchiveAction, LayoutArgs};

/// Run the archive command
pub fn run(action: ArchiveAction) -> Result<()> {
    match action {
        ArchiveAction::List { file, layout } => {
            let container = open(&file, &layout)?;
            list(&container);
            Ok(())
        }
        ArchiveAction::Extract {
            file,
            out_dir,
            layout,
        } => {
            let container = open(&file, &layout)?;
            extract(&container, &out_dir)
        }
        ArchiveAction::Replace {
            file,
            index,
            input,
            output,
            layout,
        } => {
            let mut container = open(&file, &layout)?;
            let data =
                fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            container.set(index, data)?;
            let bytes = container.serialize();
            fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Wrote {} ({} bytes)", output.display(), bytes.len());
            Ok(())
        }
    }
}

fn resolve_layout(data: &[u8], args: &LayoutArgs) -> Result<ContainerLayout> {
    if let Some(alignment) = args.packed {
        return Ok(ContainerLayout::Packed { alignment });
    }
    match ContainerLayout::detect(data) {
        Some(layout) => Ok(layout),
        None => bail!("Not a NARC; pass --packed <ALIGN> for flat offset tables"),
    }
}

fn open(path: &Path, args: &LayoutArgs) -> Result<Container> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let layout = resolve_layout(&data, args)?;
    Container::parse(&data, layout).with_context(|| format!("Failed to parse {}", path.display()))
}

fn list(container: &Container) {
    println!("{} sub-files ({:?})", container.len(), container.layout());
    for (index, data) in container.iter().enumerate() {
        println!("  {:>5}  {:>8}  {}", index, data.len(), Checksum::of(data));
    }
}

fn extract(container: &Container, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for (index, data) in container.iter().enumerate() {
        let path = out_dir.join(format!("{:04}.bin", index));
        fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    info!(
        "Extracted {} sub-files to {}",
        container.len(),
        out_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narc_with(files: Vec<Vec<u8>>) -> Vec<u8> {
        Container::from_files(ContainerLayout::Narc, files).serialize()
    }

    #[test]
    fn test_resolve_layout() {
        let narc = narc_with(vec![vec![1]]);
        assert_eq!(
            resolve_layout(&narc, &LayoutArgs { packed: None }).unwrap(),
            ContainerLayout::Narc
        );
        assert_eq!(
            resolve_layout(&[0; 8], &LayoutArgs { packed: Some(4) }).unwrap(),
            ContainerLayout::Packed { alignment: 4 }
        );
        assert!(resolve_layout(&[0; 8], &LayoutArgs { packed: None }).is_err());
    }

    #[test]
    fn test_replace_then_extract() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a011.narc");
        let replacement = dir.path().join("new.bin");
        let rebuilt = dir.path().join("out.narc");
        fs::write(&original, narc_with(vec![vec![1; 4], vec![2; 4]])).unwrap();
        fs::write(&replacement, [9u8; 10]).unwrap();

        run(ArchiveAction::Replace {
            file: original.clone(),
            index: 1,
            input: replacement,
            output: rebuilt.clone(),
            layout: LayoutArgs { packed: None },
        })
        .unwrap();

        let out_dir = dir.path().join("files");
        run(ArchiveAction::Extract {
            file: rebuilt,
            out_dir: out_dir.clone(),
            layout: LayoutArgs { packed: None },
        })
        .unwrap();
        assert_eq!(fs::read(out_dir.join("0000.bin")).unwrap(), vec![1; 4]);
        assert_eq!(fs::read(out_dir.join("0001.bin")).unwrap(), vec![9; 10]);

        // The source archive is never touched.
        let untouched = Container::parse(&fs::read(&original).unwrap(), ContainerLayout::Narc);
        assert_eq!(untouched.unwrap().get(1).unwrap(), &[2; 4]);
    }

    #[test]
    fn test_replace_bad_index_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.narc");
        let replacement = dir.path().join("new.bin");
        let rebuilt = dir.path().join("out.narc");
        fs::write(&original, narc_with(vec![vec![1; 4]])).unwrap();
        fs::write(&replacement, [9u8; 2]).unwrap();

        let result = run(ArchiveAction::Replace {
            file: original,
            index: 5,
            input: replacement,
            output: rebuilt.clone(),
            layout: LayoutArgs { packed: None },
        });
        assert!(result.is_err());
        assert!(!rebuilt.exists());
    }
}
