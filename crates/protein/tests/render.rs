//! End-to-end rendering: interpolation, collapse behavior, loops, closures,
//! and module exports, driven through the public interpreter API.

use std::sync::Arc;

use protein::{Interpreter, NativeModuleRegistry, Node};

fn render(source: &str) -> Node {
    Interpreter::new().render_str(source).unwrap()
}

fn yaml(node: &Node) -> String {
    Interpreter::to_yaml_string(node).unwrap()
}

#[test]
fn basic_interpolation() {
    let out = render(
        r#"
.define:
  name: Alice
message: "Hello, {{ name }}!"
"#,
    );
    assert_eq!(
        out.as_mapping().unwrap().get("message"),
        Some(&Node::string("Hello, Alice!"))
    );
}

#[test]
fn foreach_over_empty_sequence_stays_a_sequence() {
    let out = render(
        r#"
.define:
  xs: []
items:
  .foreach:
    .values: [x, "{{ xs }}"]
    .do:
      - "{{ x }}"
"#,
    );
    assert_eq!(
        out.as_mapping().unwrap().get("items"),
        Some(&Node::Sequence(vec![]))
    );
}

#[test]
fn foreach_merges_single_key_mappings() {
    let out = render(
        r#"
.define:
  users:
    - {id: 1, name: joe}
    - {id: 2, name: jill}
result:
  .foreach:
    .values: [u, "{{ users }}"]
    .do:
      "{{ u.name }}":
        id: "{{ u.id }}"
"#,
    );
    let result = out.as_mapping().unwrap().get("result").unwrap();
    let map = result.as_mapping().unwrap();
    assert_eq!(map.keys().collect::<Vec<_>>(), vec!["joe", "jill"]);
    assert_eq!(
        map.get("joe").unwrap().as_mapping().unwrap().get("id"),
        Some(&Node::Int(1))
    );
    assert_eq!(
        map.get("jill").unwrap().as_mapping().unwrap().get("id"),
        Some(&Node::Int(2))
    );
}

#[test]
fn foreach_collect_mappings_disabled_keeps_the_sequence() {
    let out = render(
        r#"
.define:
  users:
    - {id: 1, name: joe}
    - {id: 2, name: jill}
result:
  .foreach:
    .values: [u, "{{ users }}"]
    .collect_mappings: false
    .do:
      "{{ u.name }}":
        id: "{{ u.id }}"
"#,
    );
    let result = out.as_mapping().unwrap().get("result").unwrap();
    let items = result.as_sequence().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0].as_mapping().unwrap().contains_key("joe"));
    assert!(items[1].as_mapping().unwrap().contains_key("jill"));
}

#[test]
fn foreach_accepts_a_bare_identifier_iterable() {
    let out = render(
        r#"
.define:
  xs: [a, b]
items:
  .foreach:
    .values: [x, xs]
    .do:
      - "{{ x }}"
"#,
    );
    assert_eq!(
        out.as_mapping().unwrap().get("items"),
        Some(&Node::Sequence(vec![
            Node::string("a"),
            Node::string("b")
        ]))
    );
}

#[test]
fn foreach_iterates_mappings_as_key_value_pairs() {
    let out = render(
        r#"
.define:
  ports: {http: 80, https: 443}
pairs:
  .foreach:
    .values: [entry, ports]
    .collect_mappings: false
    .do:
      - "{{ entry[0] }}:{{ entry[1] }}"
"#,
    );
    // Each iteration's singleton body collapses to its element.
    let pairs = out.as_mapping().unwrap().get("pairs").unwrap();
    let items = pairs.as_sequence().unwrap();
    assert_eq!(items[0], Node::string("http:80"));
    assert_eq!(items[1], Node::string("https:443"));
}

#[test]
fn do_collapse_laws() {
    // Empty body yields nothing.
    let out = render("a: 1\nb:\n  .do: []\n");
    assert_eq!(out.as_mapping().unwrap().get("b"), Some(&Node::Null));

    // A singleton body yields its element.
    let out = render("b:\n  .do:\n    - 42\n");
    assert_eq!(out.as_mapping().unwrap().get("b"), Some(&Node::Int(42)));

    // Distinct single-key mappings merge.
    let out = render("b:\n  .do:\n    - a: 1\n    - c: 2\n");
    let b = out.as_mapping().unwrap().get("b").unwrap();
    let map = b.as_mapping().unwrap();
    assert_eq!(map.get("a"), Some(&Node::Int(1)));
    assert_eq!(map.get("c"), Some(&Node::Int(2)));
}

#[test]
fn function_call_binds_arguments() {
    let out = render(
        r#"
test:
  .do:
    - .function:
        .name: add
        .args: [a, b]
        .do:
          value: "{{ a + b }}"
    - .call:
        .name: add
        .args: [3, 4]
    - .call:
        .name: add
        .args: [3, 5]
"#,
    );
    let test = out.as_mapping().unwrap().get("test").unwrap();
    let items = test.as_sequence().unwrap();
    assert_eq!(
        items[0].as_mapping().unwrap().get("value"),
        Some(&Node::Int(7))
    );
    assert_eq!(
        items[1].as_mapping().unwrap().get("value"),
        Some(&Node::Int(8))
    );
}

#[test]
fn call_accepts_named_arguments() {
    let out = render(
        r#"
test:
  .do:
    - .function:
        .name: mk
        .args: [env, retries]
        .do:
          name: "{{ env }}_{{ retries }}"
    - .call:
        .name: mk
        .args:
          retries: 5
          env: test
"#,
    );
    let test = out.as_mapping().unwrap().get("test").unwrap();
    assert_eq!(
        test.as_mapping().unwrap().get("name"),
        Some(&Node::string("test_5"))
    );
}

#[test]
fn closures_capture_their_definition_environment() {
    let out = render(
        r#"
test:
  .do:
    - .define:
        x: 1
    - .function:
        .name: f
        .args: []
        .do:
          value: "{{ x }}"
    - .define:
        x: 2
    - .call:
        .name: f
        .args: []
"#,
    );
    let test = out.as_mapping().unwrap().get("test").unwrap();
    assert_eq!(
        test.as_mapping().unwrap().get("value"),
        Some(&Node::Int(1))
    );
}

#[test]
fn call_arguments_shadow_captured_names() {
    let out = render(
        r#"
test:
  .do:
    - .define:
        x: 5
    - .function:
        .name: f
        .args: [x]
        .do:
          value: "{{ x }}"
    - .call:
        .name: f
        .args: [42]
"#,
    );
    let test = out.as_mapping().unwrap().get("test").unwrap();
    assert_eq!(
        test.as_mapping().unwrap().get("value"),
        Some(&Node::Int(42))
    );
}

#[test]
fn caller_scope_is_invisible_inside_a_closure() {
    // y is defined only after capture, in the caller's scope.
    let err = Interpreter::new()
        .render_str(
            r#"
test:
  .do:
    - .function:
        .name: f
        .args: []
        .do:
          value: "{{ y }}"
    - .define:
        y: 1
    - .call:
        .name: f
        .args: []
"#,
        )
        .unwrap_err();
    assert_eq!(err.label(), "undefined");
}

#[test]
fn module_exports_work_in_expressions_and_as_constructs() {
    let mut registry = NativeModuleRegistry::new();
    registry.register("site/servers", |env| {
        env.export(
            "servers",
            Arc::new(|args, _| {
                let group = args.first().and_then(Node::as_str).unwrap_or_default();
                if group == "live" {
                    Ok(Node::Sequence(vec![
                        Node::Sequence(vec![
                            Node::string("apollo"),
                            Node::string("192.168.1.10"),
                        ]),
                        Node::Sequence(vec![
                            Node::string("athena"),
                            Node::string("192.168.1.40"),
                        ]),
                    ]))
                } else {
                    Ok(Node::Sequence(vec![]))
                }
            }),
        );
        env.set_variable("region", Node::string("eu-1"));
        Ok(())
    });

    let mut interp = Interpreter::new();
    interp.set_module_loader(Box::new(registry));
    let out = interp
        .render_str(
            r#"
.module: site/servers
live: "{{ servers('live') }}"
region: "{{ region }}"
direct:
  .servers: [live]
"#,
        )
        .unwrap();

    let map = out.as_mapping().unwrap();
    let live = map.get("live").unwrap().as_sequence().unwrap();
    assert_eq!(live.len(), 2);
    assert_eq!(
        live[0],
        Node::Sequence(vec![
            Node::string("apollo"),
            Node::string("192.168.1.10")
        ])
    );
    assert_eq!(map.get("region"), Some(&Node::string("eu-1")));
    // The export doubles as a construct.
    assert_eq!(map.get("direct"), map.get("live"));
}

#[test]
fn module_filters_apply_in_templates() {
    let mut registry = NativeModuleRegistry::new();
    registry.register("text", |env| {
        env.filter(
            "shout",
            Arc::new(|args, _| {
                let text = args.first().and_then(Node::as_str).unwrap_or_default();
                Ok(Node::string(text.to_uppercase()))
            }),
        );
        Ok(())
    });

    let mut interp = Interpreter::new();
    interp.set_module_loader(Box::new(registry));
    let out = interp
        .render_str(".module: text\nloud: \"{{ 'quiet' | shout }}\"\n")
        .unwrap();
    assert_eq!(
        out.as_mapping().unwrap().get("loud"),
        Some(&Node::string("QUIET"))
    );
}

#[test]
fn to_html_renders_markdown_from_templates() {
    let out = render(
        r#"
.define:
  body: |
    # Release notes

    :::note
    ~~old~~ new
    :::
page: "{{ body | to_html }}"
inline: "{{ to_html('~~old~~ new') }}"
"#,
    );
    let map = out.as_mapping().unwrap();
    let page = map.get("page").unwrap().as_str().unwrap();
    assert!(page.contains("<h1>"));
    assert!(page.contains("<div class=\"note\">"));
    assert!(page.contains("<del>old</del>"));
    let inline = map.get("inline").unwrap().as_str().unwrap();
    assert!(inline.contains("<del>old</del>"));
}

#[test]
fn literal_strings_pass_through_unchanged() {
    let out = render(r##"cmd: "#!literal run {{ target }}""##);
    assert_eq!(
        out.as_mapping().unwrap().get("cmd"),
        Some(&Node::literal("run {{ target }}"))
    );
    // The sentinel is stripped on emission and the template is intact.
    let emitted = yaml(&out);
    assert!(emitted.contains("run {{ target }}"));
    assert!(!emitted.contains("#!literal"));
}

#[test]
fn yaml_round_trip_law() {
    let out = render(
        r##"
.define:
  users:
    - {id: 1, name: joe}
    - {id: 2, name: jill}
roster:
  .foreach:
    .values: [u, users]
    .do:
      "{{ u.name }}":
        id: "{{ u.id }}"
count: "{{ users | length }}"
flag: "#!literal {{ raw }}"
"##,
    );
    let emitted = yaml(&out);
    let reparsed = protein::node::parse_yaml(&emitted).unwrap();
    assert_eq!(reparsed, out.normalized());
}

#[test]
fn rendered_trees_carry_no_dotted_keys() {
    let out = render(
        r#"
.define:
  n: 2
top:
  .if:
    .cond: "{{ n > 1 }}"
    .then:
      .do:
        - a: 1
        - b: 2
"#,
    );
    assert!(!out.has_dotted_keys());
}

#[test]
fn print_writes_to_the_diagnostics_stream() {
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let sink = Sink(Arc::new(Mutex::new(Vec::new())));
    let mut interp = Interpreter::new();
    interp.set_diagnostics(Box::new(sink.clone()));
    let out = interp
        .render_str(".define:\n  who: world\na:\n  .print: \"hello {{ who }}\"\n")
        .unwrap();

    let captured = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
    assert_eq!(captured, "hello world\n");
    // .print leaves no trace in the output tree.
    assert_eq!(out.as_mapping().unwrap().get("a"), Some(&Node::Null));
}

#[test]
fn get_env_builtin_is_visible_in_expressions() {
    // Deterministic regardless of the environment: unset name, default given.
    let out = render(r#"v: "{{ get_env('PROTEIN_TEST_UNSET_VAR', 'dflt') }}""#);
    assert_eq!(
        out.as_mapping().unwrap().get("v"),
        Some(&Node::string("dflt"))
    );
}

#[test]
fn programmatic_definitions_are_visible() {
    let mut interp = Interpreter::new();
    interp.define("version", Node::string("1.4.0"));
    let out = interp.render_str("v: \"version {{ version }}\"").unwrap();
    assert_eq!(
        out.as_mapping().unwrap().get("v"),
        Some(&Node::string("version 1.4.0"))
    );
}

#[test]
fn overrides_win_over_document_definitions() {
    let tree = protein::node::parse_yaml(".define:\n  name: doc\nmsg: \"{{ name }}\"\n").unwrap();
    let overrides = [protein::overrides::Override::parse("name=cli").unwrap()];
    let tree = protein::overrides::apply(tree, &overrides).unwrap();
    let out = Interpreter::new().render(&tree).unwrap();
    assert_eq!(
        out.as_mapping().unwrap().get("msg"),
        Some(&Node::string("cli"))
    );
}
