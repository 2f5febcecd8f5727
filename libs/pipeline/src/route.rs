use bridge_api::{SubscriptionSpec, is_valid_filter, topic_matches};

use crate::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    /// `{topic}`: topic целиком.
    Topic,
    /// `{N}`: N-й уровень topic'а, с нуля.
    Level(usize),
}

/// Разобранный шаблон пути в store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    parts: Vec<Part>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, PipelineError> {
        let err = |detail: &str| PipelineError::Template {
            template: template.to_string(),
            detail: detail.to_string(),
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(err("unclosed '{'")),
                            Some(c) => name.push(c),
                        }
                    }
                    let part = match name.as_str() {
                        "topic" => Part::Topic,
                        n => Part::Level(
                            n.parse()
                                .map_err(|_| err(&format!("unknown placeholder '{{{n}}}'")))?,
                        ),
                    };
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(part);
                }
                '}' => return Err(err("unmatched '}'")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        if parts.is_empty() {
            return Err(err("empty template"));
        }

        Ok(Self {
            source: template.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Наибольший `{N}` в шаблоне.
    fn max_level(&self) -> Option<usize> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Level(n) => Some(*n),
                _ => None,
            })
            .max()
    }

    /// Подставить topic. None, если в topic'е нет нужного уровня.
    pub fn render(&self, topic: &str) -> Option<String> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Topic => out.push_str(topic),
                Part::Level(n) => out.push_str(levels.get(*n)?),
            }
        }
        Some(normalize_path(&out))
    }
}

/// Один ведущий `/`, без завершающего `/` и пустых сегментов.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Сопоставление topic → путь в store по списку подписок.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<(SubscriptionSpec, PathTemplate)>,
}

impl Router {
    pub fn new(specs: &[SubscriptionSpec]) -> Result<Self, PipelineError> {
        let mut routes = Vec::with_capacity(specs.len());
        for spec in specs {
            if !is_valid_filter(&spec.topic) {
                return Err(PipelineError::Config {
                    context: "subscriptions",
                    detail: format!("invalid topic filter '{}'", spec.topic),
                });
            }
            let template = PathTemplate::parse(&spec.target_path_template)?;
            if let Some(max) = template.max_level() {
                let fixed_levels = spec.topic.split('/').count();
                if !spec.topic.ends_with('#') && max >= fixed_levels {
                    return Err(PipelineError::Template {
                        template: spec.target_path_template.clone(),
                        detail: format!(
                            "'{{{max}}}' out of range for '{}' ({fixed_levels} levels)",
                            spec.topic
                        ),
                    });
                }
            }
            routes.push((spec.clone(), template));
        }
        Ok(Self { routes })
    }

    /// Filters в порядке конфигурации, без повторов.
    pub fn filters(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.routes.len());
        for (spec, _) in &self.routes {
            if !out.contains(&spec.topic) {
                out.push(spec.topic.clone());
            }
        }
        out
    }

    pub fn specs(&self) -> impl Iterator<Item = (&SubscriptionSpec, &PathTemplate)> {
        self.routes.iter().map(|(s, t)| (s, t))
    }

    /// Путь для topic'а: первая совпавшая подписка.
    pub fn route(&self, topic: &str) -> Option<String> {
        self.routes
            .iter()
            .find(|(spec, _)| topic_matches(&spec.topic, topic))
            .and_then(|(_, template)| template.render(topic))
    }
}
