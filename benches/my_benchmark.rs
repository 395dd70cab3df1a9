use criterion::{criterion_group, criterion_main, Criterion};
use simi::Simi;

fn simi() -> Simi {
    Simi::new().with_output(Box::new(std::io::sink()))
}

fn fibonacci() {
    let src = r#"
def fib(n):
    if n < 2: return n
    return fib(n - 2) + fib(n - 1)
end
print fib(20)
"#;

    simi().run(src).unwrap();
}

fn zoo() {
    let src = r#"
class Zoo:
    def init():
        self.aardvark = 1
        self.baboon   = 1
        self.cat      = 1
        self.donkey   = 1
        self.elephant = 1
        self.fox      = 1
    end
    def ant():    return self.aardvark
    def banana(): return self.baboon
    def tuna():   return self.cat
    def hay():    return self.donkey
    def grass():  return self.elephant
    def mouse():  return self.fox
end

zoo = Zoo()
$sum = 0
while sum < 30000:
    sum = sum + zoo.ant() + zoo.banana() + zoo.tuna() + zoo.hay() + zoo.grass() + zoo.mouse()
end
print sum
"#;

    simi().run(src).unwrap();
}

fn generator() {
    let src = r#"
def counter():
    yield 1
    yield 2
    return 3
end
$total = 0
for x in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]:
    total = total + counter() * x
end
print total
"#;

    simi().run(src).unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("my-benchmark");
    group.sample_size(20);
    group.bench_function("fib 20", |b| b.iter(fibonacci));
    group.bench_function("zoo", |b| b.iter(zoo));
    group.bench_function("generator", |b| b.iter(generator));
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
