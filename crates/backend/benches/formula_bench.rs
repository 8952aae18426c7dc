//! Benchmarks for door formulas
//!
//! These benchmarks measure:
//! 1. Compiling formulas of growing size
//! 2. Evaluating a compiled formula (the per-message hot path)
//! 3. Cache hits versus fresh compilation
//!
//! Run with: cargo bench -p signalgate --bench formula_bench

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use signalgate::formula::{FormulaCache, compile};

/// Variable names `A`, `B`, ... `Z`, `AA`, `AB`, ...
fn variable_names(count: usize) -> Vec<String> {
  (0..count)
    .map(|i| {
      let mut name = String::new();
      let mut n = i;
      loop {
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
          break;
        }
        n = n / 26 - 1;
      }
      name
    })
    .collect()
}

/// Alternating AND / OR over every variable, every third one negated
fn generate_formula(variables: &[String]) -> String {
  let mut formula = String::new();
  for (i, variable) in variables.iter().enumerate() {
    if i > 0 {
      formula.push_str(if i % 2 == 0 { " | " } else { " & " });
    }
    if i % 3 == 0 {
      formula.push('!');
    }
    formula.push_str(variable);
  }
  formula
}

fn bench_compile(c: &mut Criterion) {
  let mut group = c.benchmark_group("compile");

  for size in [2, 8, 32, 128] {
    let variables = variable_names(size);
    let formula = generate_formula(&variables);
    group.throughput(Throughput::Elements(size as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
      b.iter(|| compile(black_box(&formula), black_box(&variables)).unwrap());
    });
  }

  group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
  let mut group = c.benchmark_group("evaluate");

  for size in [2, 8, 32, 128] {
    let variables = variable_names(size);
    let compiled = compile(&generate_formula(&variables), &variables).unwrap();
    let values: Vec<bool> = (0..size).map(|i| i % 2 == 0).collect();

    group.bench_with_input(BenchmarkId::new("positional", size), &size, |b, _| {
      b.iter(|| compiled.evaluate(black_box(&values)));
    });
    group.bench_with_input(BenchmarkId::new("by_name", size), &size, |b, _| {
      b.iter(|| compiled.evaluate_with(|name| black_box(name.len() % 2 == 1)));
    });
  }

  group.finish();
}

fn bench_cache(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();
  let variables = variable_names(32);
  let formula = generate_formula(&variables);

  let mut group = c.benchmark_group("cache");

  let cache = FormulaCache::new(64);
  rt.block_on(cache.get_or_compile(&formula, &variables)).unwrap();
  group.bench_function("hit", |b| {
    b.iter(|| rt.block_on(cache.get_or_compile(black_box(&formula), &variables)).unwrap());
  });

  group.bench_function("miss", |b| {
    b.iter(|| {
      let cache = FormulaCache::new(64);
      rt.block_on(cache.get_or_compile(black_box(&formula), &variables)).unwrap()
    });
  });

  group.finish();
}

criterion_group!(benches, bench_compile, bench_evaluate, bench_cache);
criterion_main!(benches);
