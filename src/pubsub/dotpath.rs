//! Шаблоны имён каналов.
//!
//! Имя канала состоит из сегментов, разделённых точкой. Сегмент шаблона
//! либо литерал, либо параметр в фигурных скобках: `room.{id}.chat`.
//! Шаблон компилируется один раз в якорное регулярное выражение с
//! именованными группами; шаблоны без параметров сравниваются простым
//! равенством строк.

use std::fmt;

use regex::Regex;
use zvon_error::ConfigError;

const DELIMITER: char = '.';

/// Одна пара имя/значение, извлечённая из имени канала.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// Упорядоченный список параметров: порядок совпадает с порядком
/// появления плейсхолдеров в шаблоне.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<Param>);

/// Скомпилированный шаблон канала.
#[derive(Debug, Clone)]
pub struct DotPath {
    path: String,
    matcher: Option<Regex>,
    names: Vec<String>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Params {
    pub fn new(params: Vec<Param>) -> Self {
        Self(params)
    }

    /// Значение параметра по имени.
    pub fn get(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == name)
            .map(|p| p.value.as_str())
    }

    /// Значение параметра или пустая строка, если его нет.
    pub fn param(
        &self,
        name: &str,
    ) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }
}

impl DotPath {
    /// Компилирует шаблон.
    ///
    /// # Ошибки
    /// - [`ConfigError::EmptyPattern`] для пустой строки;
    /// - [`ConfigError::EmptySegment`] для `a..b`, `.a`, `a.`;
    /// - [`ConfigError::InvalidPlaceholder`] для сегментов вроде `{}`,
    ///   `x{id}`, `{a-b}`;
    /// - [`ConfigError::DuplicateParam`] если имя параметра повторяется.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        if path.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }

        let mut parts = Vec::new();
        let mut names: Vec<String> = Vec::new();

        for (index, segment) in path.split(DELIMITER).enumerate() {
            if segment.is_empty() {
                return Err(ConfigError::EmptySegment {
                    pattern: path.to_string(),
                    index,
                });
            }

            if !segment.contains(['{', '}']) {
                parts.push(regex::escape(segment));
                continue;
            }

            let name = placeholder_name(segment).ok_or_else(|| ConfigError::InvalidPlaceholder {
                pattern: path.to_string(),
                segment: segment.to_string(),
            })?;

            if names.iter().any(|n| n == name) {
                return Err(ConfigError::DuplicateParam {
                    pattern: path.to_string(),
                    name: name.to_string(),
                });
            }

            parts.push(format!(r"(?P<{name}>\w+)"));
            names.push(name.to_string());
        }

        let matcher = if names.is_empty() {
            None
        } else {
            let source = format!("^{}$", parts.join(r"\."));
            let regex = Regex::new(&source).map_err(|e| ConfigError::InvalidRegex {
                pattern: path.to_string(),
                reason: e.to_string(),
            })?;
            Some(regex)
        };

        Ok(Self {
            path: path.to_string(),
            matcher,
            names,
        })
    }

    /// Исходная строка шаблона.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param_count(&self) -> usize {
        self.names.len()
    }

    /// Имена параметров в порядке появления.
    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    /// Проверяет имя канала и извлекает параметры.
    ///
    /// # Возвращает
    /// - `Some(Params)` при совпадении (пустой список для литерального
    ///   шаблона);
    /// - `None`, если имя не подходит.
    pub fn matches(
        &self,
        topic: &str,
    ) -> Option<Params> {
        let Some(matcher) = &self.matcher else {
            return (topic == self.path).then(Params::default);
        };

        let captures = matcher.captures(topic)?;
        let params = self
            .names
            .iter()
            .map(|name| Param {
                key: name.clone(),
                value: captures
                    .name(name)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect();

        Some(Params(params))
    }
}

/// Имя параметра из сегмента `{name}`; `None`, если сегмент не является
/// корректным плейсхолдером.
fn placeholder_name(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix('{')?.strip_suffix('}')?;
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for DotPath {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("test.{id}.channel", 1)]
    #[case("test.{id}.channel.{otherId}", 2)]
    #[case("test.channel", 0)]
    #[case("{a}", 1)]
    fn test_param_count(
        #[case] pattern: &str,
        #[case] expected: usize,
    ) {
        let dp = DotPath::new(pattern).unwrap();
        assert_eq!(dp.param_count(), expected, "{pattern}");
    }

    #[rstest]
    #[case("a.{id}.b", "a.1.b", true)]
    #[case("a.{id}.b", "a.b", false)]
    #[case("a.{id}.b", "a.1.2.b", false)]
    #[case("a.{id}.b", "xa.1.b", false)]
    #[case("a.{id}.b", "a.1.bx", false)]
    #[case("a.b", "a.b", true)]
    #[case("a.b", "a.b.c", false)]
    #[case("a.b", "aXb", false)]
    fn test_matches(
        #[case] pattern: &str,
        #[case] topic: &str,
        #[case] expected: bool,
    ) {
        let dp = DotPath::new(pattern).unwrap();
        assert_eq!(dp.matches(topic).is_some(), expected, "{pattern} vs {topic}");
    }

    /// Тест проверяет извлечение значения параметра.
    #[test]
    fn test_extracts_single_param() {
        let dp = DotPath::new("a.{id}.b").unwrap();
        let params = dp.matches("a.1.b").unwrap();
        assert_eq!(params.get("id"), Some("1"));
        assert_eq!(params.param("missing"), "");
    }

    /// Тест проверяет, что порядок параметров совпадает с порядком в шаблоне,
    /// а не с алфавитным.
    #[test]
    fn test_param_order_follows_pattern() {
        let dp = DotPath::new("a.{x}.c.{y}").unwrap();
        let params = dp.matches("a.1.c.2").unwrap();
        let keys: Vec<_> = params.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, ["x", "y"]);
        assert_eq!(params.get("x"), Some("1"));
        assert_eq!(params.get("y"), Some("2"));

        let dp = DotPath::new("z.{zeta}.{alpha}").unwrap();
        let params = dp.matches("z.1.2").unwrap();
        let keys: Vec<_> = params.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    /// Литеральный шаблон возвращает пустой список параметров.
    #[test]
    fn test_literal_has_empty_params() {
        let dp = DotPath::new("test.channel").unwrap();
        let params = dp.matches("test.channel").unwrap();
        assert!(params.is_empty());
    }

    /// Точки внутри литерала не трактуются как "любой символ".
    #[test]
    fn test_literal_segments_are_escaped() {
        let dp = DotPath::new("a+.{id}").unwrap();
        assert!(dp.matches("a+.7").is_some());
        assert!(dp.matches("aa.7").is_none());
    }

    #[rstest]
    #[case("", ConfigError::EmptyPattern)]
    #[case("a..b", ConfigError::EmptySegment { pattern: "a..b".into(), index: 1 })]
    #[case("a.{}", ConfigError::InvalidPlaceholder { pattern: "a.{}".into(), segment: "{}".into() })]
    #[case("a.x{id}", ConfigError::InvalidPlaceholder { pattern: "a.x{id}".into(), segment: "x{id}".into() })]
    #[case("{a}.{a}", ConfigError::DuplicateParam { pattern: "{a}.{a}".into(), name: "a".into() })]
    fn test_invalid_patterns(
        #[case] pattern: &str,
        #[case] expected: ConfigError,
    ) {
        assert_eq!(DotPath::new(pattern).unwrap_err(), expected);
    }

    proptest! {
        /// Литеральный шаблон совпадает только с самим собой.
        #[test]
        fn prop_literal_matches_only_itself(
            segs in prop::collection::vec("[a-z0-9_]{1,6}", 1..5),
            suffix in "[a-z]{1,3}",
        ) {
            let pattern = segs.join(".");
            let dp = DotPath::new(&pattern).unwrap();
            prop_assert!(dp.matches(&pattern).is_some());
            let longer = format!("{pattern}.{suffix}");
            prop_assert!(dp.matches(&longer).is_none());
        }

        /// Значения параметров возвращаются без изменений.
        #[test]
        fn prop_param_values_roundtrip(a in "[A-Za-z0-9_]{1,8}", b in "[A-Za-z0-9_]{1,8}") {
            let dp = DotPath::new("p.{first}.q.{second}").unwrap();
            let params = dp.matches(&format!("p.{a}.q.{b}")).unwrap();
            prop_assert_eq!(params.get("first"), Some(a.as_str()));
            prop_assert_eq!(params.get("second"), Some(b.as_str()));
        }
    }
}
