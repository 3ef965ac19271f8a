//! Micro-benchmarks for the launch hot path: quoting, env block, hand-off stack.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mkjobs_core::{quote_args, split_command_line, AtomicStack, EnvBlock, QuoteDialect, StackLink, StackNode};

fn compile_line() -> Vec<String> {
    let mut args = vec!["cc".to_string(), "-c".to_string(), "-O2".to_string()];
    for i in 0..32 {
        args.push(format!("-Iinclude dir {}\\", i));
        args.push(format!("-DNAME_{}=\"value {}\"", i, i));
    }
    args.push("src/main.c".to_string());
    args
}

fn bench_quote(c: &mut Criterion) {
    let args = compile_line();
    c.bench_function("quote_args/simple", |b| {
        b.iter(|| quote_args(black_box(&args), QuoteDialect::Simple))
    });
    let line = quote_args(&args, QuoteDialect::Simple);
    c.bench_function("split_command_line", |b| {
        b.iter(|| split_command_line(black_box(line.as_str())))
    });
}

fn bench_env_block(c: &mut Criterion) {
    let vars: Vec<String> = (0..200)
        .map(|i| format!("VAR_{}={}", i, "x".repeat(40)))
        .chain(std::iter::once("PATH=/usr/local/bin:/usr/bin:/bin".to_string()))
        .collect();
    c.bench_function("env_block/200", |b| b.iter(|| EnvBlock::from_entries(black_box(&vars))));
}

struct Node {
    link: StackLink<Node>,
    _v: u64,
}

unsafe impl StackNode for Node {
    fn link(&self) -> &StackLink<Self> {
        &self.link
    }
}

fn bench_stack(c: &mut Criterion) {
    let stack = AtomicStack::new();
    c.bench_function("stack/push_take_64", |b| {
        b.iter(|| {
            for i in 0..64 {
                stack.push(Box::new(Node { link: StackLink::new(), _v: i }));
            }
            black_box(stack.take_all().count())
        })
    });
}

criterion_group!(benches, bench_quote, bench_env_block, bench_stack);
criterion_main!(benches);
