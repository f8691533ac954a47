use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tk_core::types::{priority, ResourceType, RuleCondition, RULE_ID_FOCUS};
use tk_core::{rule_id, Matcher, RequestContext, Rule, RuleAction};

fn block_list(count: usize) -> Vec<Rule> {
    (0..count)
        .map(|i| {
            let domain = format!("site{i}.example");
            Rule {
                id: rule_id(&domain),
                priority: priority::SITE_BLOCK,
                action: RuleAction::redirect_to("/intention.html"),
                condition: RuleCondition {
                    url_filter: format!("||{domain}^"),
                    resource_types: ResourceType::MAIN_FRAME,
                    excluded_request_domains: BTreeSet::new(),
                },
            }
        })
        .collect()
}

fn bench_matching(c: &mut Criterion) {
    let mut rules = block_list(200);
    rules.push(Rule {
        id: RULE_ID_FOCUS,
        priority: priority::STRICT_BLOCK,
        action: RuleAction::redirect_to("/intention.html"),
        condition: RuleCondition {
            url_filter: "*".to_string(),
            resource_types: ResourceType::MAIN_FRAME,
            excluded_request_domains: ["api.aladhan.com".to_string()].into_iter().collect(),
        },
    });
    let matcher = Matcher::new(&rules);

    c.bench_function("navigation_hit", |b| {
        b.iter(|| {
            matcher.match_request(black_box(&RequestContext::navigation(
                "https://www.site150.example/watch?v=abc",
                1,
            )))
        })
    });

    c.bench_function("navigation_excluded", |b| {
        b.iter(|| {
            matcher.match_request(black_box(&RequestContext::navigation(
                "https://api.aladhan.com/v1/timings?latitude=1&longitude=2",
                1,
            )))
        })
    });
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
