use std::io::Write;
use std::process::{Command, Output, Stdio};

fn loxic() -> Command {
    Command::new(env!("CARGO_BIN_EXE_loxic"))
}

fn run_with(args: &[&str], source: &str) -> Output {
    let mut script = tempfile::Builder::new().suffix(".lox").tempfile().expect("create temp script");
    script.write_all(source.as_bytes()).expect("write temp script");
    loxic().args(args).arg(script.path()).output().expect("failed to run loxic")
}

fn run(source: &str) -> Output {
    run_with(&[], source)
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- Success path ---

#[test]
fn well_formed_program_exits_zero_with_empty_stderr() {
    let out = run("var greeting = \"hello\";\nprint greeting + \" world\";\nprint 1 + 2;");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hello world\n3\n");
    assert_eq!(stderr(&out), "");
}

#[test]
fn classes_closures_and_inheritance() {
    let source = r#"
class Animal {
  init(name) { this.name = name; }
  speak() { return this.name + " makes a sound"; }
}
class Dog < Animal {
  speak() { return super.speak() + " (woof)"; }
}
fun makeCounter() {
  var n = 0;
  fun next() { n = n + 1; return n; }
  return next;
}
var counter = makeCounter();
counter();
print Dog("Rex").speak();
print counter();
"#;
    let out = run(source);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "Rex makes a sound (woof)\n2\n");
}

#[test]
fn for_loop_closures_capture_the_shared_loop_variable() {
    let source = r#"
var f1;
var f2;
var f3;
for (var i = 1; i < 4; i = i + 1) {
  var j = i;
  fun f() {
    print i;
    print j;
  }
  if (j == 1) f1 = f;
  else if (j == 2) f2 = f;
  else f3 = f;
}
f1();
f2();
f3();
"#;
    let out = run(source);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "4\n1\n4\n2\n4\n3\n");
}

#[test]
fn object_identity_equality() {
    let source = r#"
class Point {
  init(x, y) { this.x = x; this.y = y; }
}
var a = Point(1, 2);
var b = Point(1, 2);
var c = a;
print a == a;
print a == b;
print b == a;
print a == Point;
print a == c;
print a != c;
c.x = 10;
print a == c;
print a.x == b.x;
"#;
    let out = run(source);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    assert_eq!(lines, vec!["true", "false", "false", "false", "true", "false", "true", "false"]);
    assert_eq!(stderr(&out).trim(), "");
}

#[test]
fn million_node_chain_exits_cleanly() {
    let source = r#"
class Node {
  init(next) { this.next = next; }
}
var head = nil;
for (var i = 0; i < 1000000; i = i + 1) head = Node(head);
print "built";
"#;
    let out = run(source);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "built\n");
    assert_eq!(stderr(&out), "");
}

// --- Interactive prompt ---

fn repl(input: &str) -> Output {
    let mut child = loxic()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start loxic");
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(input.as_bytes())
        .expect("write to stdin");
    child.wait_with_output().expect("failed to wait on loxic")
}

#[test]
fn repl_keeps_state_and_survives_errors() {
    let out = repl("var a = 1;\na + 41\nprint missing;\nclass P {}\nvar p = P();\np.x = a;\nprint p.x;\n");
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let printed: Vec<&str> = text.split("> ").map(str::trim).filter(|s| !s.is_empty()).collect();
    assert!(printed.contains(&"42"), "stdout: {text}");
    assert!(printed.contains(&"1"), "stdout: {text}");
    assert_eq!(stderr(&out).trim_end(), "Undefined variable 'missing'.\n[line 1] in script");
}

#[test]
fn repl_stops_at_exit() {
    let out = repl("print \"before\";\nexit\nprint \"after\";\n");
    assert_eq!(out.status.code(), Some(0));
    let text = stdout(&out);
    assert!(text.contains("before"));
    assert!(!text.contains("after"));
}

#[test]
fn repl_reports_compile_errors_per_line() {
    let out = repl("print ;\nprint 2;\n");
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("2\n"));
    assert_eq!(stderr(&out).trim_end(), "[line 1] Error at ';': Expect expression.");
}

// --- Compile errors (65) ---

fn locals_program(count: usize) -> String {
    let mut source = String::from("fun f() {\n");
    for i in 0..count {
        source.push_str(&format!("  var a{i};\n"));
    }
    source.push_str("}\nprint \"unreachable\";\n");
    source
}

#[test]
fn two_hundred_fifty_five_locals_compile() {
    let out = run(&locals_program(255));
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "unreachable\n");
}

#[test]
fn too_many_locals_is_a_compile_error() {
    let out = run(&locals_program(256));
    assert_eq!(out.status.code(), Some(65));
    assert_eq!(stdout(&out), "");
    assert_eq!(stderr(&out).trim_end(), "[line 257] Error at 'a255': Too many local variables in function.");
}

#[test]
fn loop_body_too_large_is_a_compile_error() {
    let mut lines = vec!["while (false) {".to_string()];
    let chunk = vec!["nil;"; 256].join(" ");
    for _ in 0..128 {
        lines.push(format!("  {chunk}"));
    }
    lines.push("}".to_string());
    let source = lines.join("\n") + "\n";

    let out = run(&source);
    assert_eq!(out.status.code(), Some(65));
    assert!(stderr(&out).contains("Loop body too large."), "stderr: {}", stderr(&out));
}

#[test]
fn independent_compile_errors_are_all_reported() {
    let out = run("print ;\nvar = 1;\nprint \"ok\";");
    assert_eq!(out.status.code(), Some(65));
    assert_eq!(stdout(&out), "");
    assert_eq!(
        stderr(&out).trim_end(),
        "[line 1] Error at ';': Expect expression.\n[line 2] Error at '=': Expect variable name."
    );
}

#[test]
fn unterminated_string_is_reported_without_location() {
    let out = run("print \"never closed;");
    assert_eq!(out.status.code(), Some(65));
    assert!(stderr(&out).starts_with("[line 1] Error: Unterminated string."));
}

// --- Runtime errors (70) ---

#[test]
fn plus_with_non_string_objects_is_a_runtime_error() {
    let source = "class A {}\nclass B {}\nprint \"before\";\nprint A() + B();\nprint \"after\";";
    let out = run(source);
    assert_eq!(out.status.code(), Some(70));
    assert_eq!(stdout(&out), "before\n");
    assert_eq!(
        stderr(&out).trim_end(),
        "Operands must be numbers or strings for +.\n[line 4] in script"
    );
}

#[test]
fn inherit_from_nil_is_a_runtime_error() {
    let out = run("var Nil = nil;\nclass Foo < Nil {}");
    assert_eq!(out.status.code(), Some(70));
    assert_eq!(stderr(&out).trim_end(), "Superclass must be a class.\n[line 2] in script");
}

#[test]
fn arity_mismatch_reports_expected_and_got() {
    let out = run("fun add(a, b) {\n  return a + b;\n}\nfun call() {\n  return add(1);\n}\ncall();");
    assert_eq!(out.status.code(), Some(70));
    assert_eq!(
        stderr(&out).trim_end(),
        "Expected 2 arguments but got 1.\n[line 5] in call()\n[line 7] in script"
    );
}

#[test]
fn undefined_property_names_the_field() {
    let out = run("class Empty {}\nprint Empty().missing;");
    assert_eq!(out.status.code(), Some(70));
    assert!(stderr(&out).starts_with("Undefined property 'missing'."));
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let out = run("fun recurse(n) { return recurse(n + 1); }\nrecurse(0);");
    assert_eq!(out.status.code(), Some(70));
    let err = stderr(&out);
    assert!(err.starts_with("Stack overflow.\n"), "stderr: {err}");
    assert!(err.trim_end().ends_with("[line 2] in script"));
}

// --- Host errors ---

#[test]
fn missing_script_exits_with_io_error() {
    let out = loxic().arg("/definitely/not/here.lox").output().expect("failed to run loxic");
    assert_eq!(out.status.code(), Some(74));
    assert!(stderr(&out).contains("Error reading file"));
}

#[test]
fn flags_need_a_script() {
    let out = loxic().arg("--scan").stdin(Stdio::null()).output().expect("failed to run loxic");
    assert!(!out.status.success());
    assert_eq!(stdout(&out), "");
}

#[test]
fn scan_and_cache_stats_conflict() {
    let out = run_with(&["--scan", "--cache-stats"], "print 1;");
    assert!(!out.status.success());
    assert_eq!(stdout(&out), "");
}
