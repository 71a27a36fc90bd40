use criterion::{black_box, criterion_group, criterion_main, Criterion};
use home_synchronizer::events::{EventMask, RawEvent};
use home_synchronizer::test_infrastructure::ScriptedSource;
use home_synchronizer::{ChangeBatcher, Target, WatchRegistry};
use std::fs;
use tempfile::TempDir;

fn tree(width: usize) -> TempDir {
	let temp_dir = TempDir::new().unwrap();
	for i in 0..width {
		let dir = temp_dir.path().join(format!("dir_{i}"));
		fs::create_dir_all(dir.join("nested")).unwrap();
		fs::write(dir.join("file.txt"), "content").unwrap();
	}
	temp_dir
}

fn bench_rebuild(c: &mut Criterion) {
	let temp_dir = tree(50);
	let targets = [Target::directory(temp_dir.path())];

	c.bench_function("registry_rebuild_101_directories", |b| {
		let mut registry = WatchRegistry::new(ScriptedSource::new());
		b.iter(|| registry.rebuild(black_box(&targets)))
	});
}

fn bench_collect(c: &mut Criterion) {
	let temp_dir = tree(50);
	let source = ScriptedSource::new();
	let mut registry = WatchRegistry::new(source.clone());
	registry.rebuild(&[Target::directory(temp_dir.path())]);
	let handles: Vec<_> = (0..50)
		.filter_map(|i| registry.handle_for(&temp_dir.path().join(format!("dir_{i}"))))
		.collect();
	let batcher = ChangeBatcher::new(1024);

	c.bench_function("batcher_collect_1000_events", |b| {
		b.iter(|| {
			for i in 0..1000 {
				let handle = handles[i % handles.len()];
				source.push(RawEvent::new(handle, EventMask::MODIFY).with_name("file.txt"));
			}
			black_box(batcher.collect(&mut registry))
		})
	});
}

criterion_group!(benches, bench_rebuild, bench_collect);
criterion_main!(benches);
