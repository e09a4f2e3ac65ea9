// Copyright 2025 The Druid Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Field resolution primitives. Every overridable field in the child-object
//! factory goes through one of these two functions, so the precedence rule
//! (node over cluster over built-in default) lives in exactly one place.

pub fn first_non_empty<'a>(node: &'a str, cluster: &'a str) -> &'a str {
    if node.is_empty() { cluster } else { node }
}

pub fn first_some<T: Clone>(node: Option<&T>, cluster: Option<&T>) -> Option<T> {
    node.or(cluster).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_non_empty() {
        assert_eq!(first_non_empty("a", "b"), "a");
        assert_eq!(first_non_empty("", "b"), "b");
        assert_eq!(first_non_empty("", ""), "");
    }

    #[test]
    fn test_first_some() {
        let node = vec!["n".to_string()];
        let cluster = vec!["c".to_string()];

        assert_eq!(
            first_some(Some(&node), Some(&cluster)).unwrap()[0],
            "n".to_string()
        );
        assert_eq!(
            first_some(None, Some(&cluster)).unwrap()[0],
            "c".to_string()
        );
        assert_eq!(first_some::<Vec<String>>(None, None), None);
    }
}
