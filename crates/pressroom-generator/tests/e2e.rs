//! End-to-end tests for page compilation.
//!
//! Templates are loaded from disk and a page with modules, Markdown and a
//! rich-text document is compiled against a fetched content batch.

use std::fs;

use pressroom_core::{Asset, ContentBatch, Entry, FieldValue, Includes, Link, SiteConfig};
use pressroom_generator::{CompileError, LinkResolver, PageCompiler, TemplateSet};
use serde_json::json;

fn write_templates(dir: &std::path::Path) {
    let files = [
        (
            "html/article.tmpl",
            "<article><h1>{{ title }}</h1>{{ markdown summary }}{{ richText body }}</article>",
        ),
        ("html/quote.tmpl", "<blockquote>{{ text }}</blockquote>"),
        ("json/article.tmpl", "{\"title\": \"{{ title }}\", \"id\": \"{{ $sys.id }}\"}"),
    ];
    for (path, source) in files {
        let path = dir.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
    }
}

fn article() -> Entry {
    Entry::new("art1", "article")
        .with_field("slug", "launch")
        .with_field("title", "Launch")
        .with_field(
            "summary",
            "We *shipped*.\n\n![diagram](//images.example.com/sp/img1/h/diagram.png)",
        )
        .with_field(
            "body",
            json!({
                "nodeType": "document",
                "content": [
                    {"nodeType": "paragraph", "content": [
                        {"nodeType": "text", "value": "Read ", "marks": []},
                        {"nodeType": "text", "value": "this", "marks": [{"type": "bold"}]}
                    ]},
                    {"nodeType": "embedded-entry-block", "content": [], "data": {
                        "target": {"sys": {"type": "Link", "linkType": "Entry", "id": "q1"}}
                    }},
                    {"nodeType": "embedded-asset-block", "content": [], "data": {
                        "target": {"sys": {"type": "Link", "linkType": "Asset", "id": "img1"}}
                    }}
                ]
            }),
        )
        .with_field("related", vec![FieldValue::Link(Link::entry("q1"))])
}

fn batch() -> ContentBatch {
    ContentBatch {
        items: vec![article()],
        includes: Includes {
            entries: vec![Entry::new("q1", "quote").with_field("text", "Ship it")],
            assets: vec![Asset::new("img1", "//images.example.com/sp/img1/h/diagram.png")],
        },
    }
}

#[test]
fn test_compile_from_template_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_templates(dir.path());
    let templates = TemplateSet::load_dir(dir.path()).unwrap();
    assert_eq!(templates.extensions().collect::<Vec<_>>(), vec!["html", "json"]);

    let mut config = SiteConfig::new("news");
    config.page_content_types = vec!["article".to_string()];
    let resolver = LinkResolver::new(&batch());
    let outputs = PageCompiler::new(&config, &templates)
        .compile(&article(), &resolver)
        .unwrap();
    assert_eq!(outputs.len(), 2);

    let html = String::from_utf8(outputs[0].content.clone()).unwrap();
    assert_eq!(outputs[0].publish_path, "launch.html");
    assert!(html.starts_with("<article><h1>Launch</h1>"));
    assert!(html.contains("<em>shipped</em>"));
    assert!(html.contains("src=\"/assets/diagram.png\""));
    assert!(html.contains("<p>Read <strong>this</strong></p>"));
    assert!(html.contains("<blockquote>Ship it</blockquote>"));
    assert!(!html.contains("images.example.com"));
    assert_eq!(outputs[0].involved_entry_ids, vec!["img1", "q1"]);

    assert_eq!(outputs[1].publish_path, "launch.json");
    assert_eq!(
        String::from_utf8(outputs[1].content.clone()).unwrap(),
        "{\"title\": \"Launch\", \"id\": \"art1\"}"
    );
}

#[test]
fn test_compile_with_missing_include() {
    let dir = tempfile::tempdir().unwrap();
    write_templates(dir.path());
    let templates = TemplateSet::load_dir(dir.path()).unwrap();

    let config = SiteConfig::new("news");
    let resolver = LinkResolver::new(&ContentBatch {
        items: vec![article()],
        includes: Includes::default(),
    });
    let err = PageCompiler::new(&config, &templates)
        .compile(&article(), &resolver)
        .unwrap_err();
    assert!(matches!(err, CompileError::Unresolved { .. }));
}
