//! Search index over one catalog snapshot.
//!
//! Built once per catalog and then only queried.  Ranking, best first:
//! name starts with the query, name contains it, group contains it, and
//! finally names or groups sharing at least half of the query's trigrams.
//! Ties keep catalog order.

use std::collections::{BTreeMap, HashMap};

use iptv_proto::protocol::{IndexDoc, WorkerRequest, WorkerResponse};

type Gram = [char; 3];

/// Queries shorter than this use the token index instead of trigrams.
const MIN_GRAM_QUERY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    NamePrefix,
    NameContains,
    GroupContains,
    Fuzzy,
}

#[derive(Debug, Default)]
pub struct SearchIndex {
    generation: u64,
    names: Vec<String>,
    groups: Vec<String>,
    /// Lowercased word -> docs whose name or group contains it.
    tokens: BTreeMap<String, Vec<u32>>,
    /// Lowercased group label -> docs in that group.
    group_postings: HashMap<String, Vec<u32>>,
    grams: HashMap<Gram, Vec<u32>>,
}

impl SearchIndex {
    pub fn build(docs: &[IndexDoc], generation: u64) -> Self {
        let mut index = Self {
            generation,
            names: Vec::with_capacity(docs.len()),
            groups: Vec::with_capacity(docs.len()),
            ..Self::default()
        };

        for (i, doc) in docs.iter().enumerate() {
            let id = i as u32;
            let name = doc.name.to_lowercase();
            let group = doc.group.to_lowercase();

            let mut words: Vec<&str> = tokenize(&name).chain(tokenize(&group)).collect();
            words.sort_unstable();
            words.dedup();
            for word in words {
                index.tokens.entry(word.to_string()).or_default().push(id);
            }

            let mut doc_grams = trigrams(&name);
            doc_grams.extend(trigrams(&group));
            doc_grams.sort_unstable();
            doc_grams.dedup();
            for gram in doc_grams {
                index.grams.entry(gram).or_default().push(id);
            }

            index.group_postings.entry(group.clone()).or_default().push(id);
            index.names.push(name);
            index.groups.push(group);
        }
        index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Ranked doc indices matching `query`, at most `limit` of them.  An
    /// empty query matches nothing.
    pub fn search(&self, query: &str, limit: usize) -> Vec<u32> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let query_grams = {
            let mut g = trigrams(&query);
            g.sort_unstable();
            g.dedup();
            g
        };

        let mut ranked: Vec<(Rank, u32, u32)> = if query.chars().count() < MIN_GRAM_QUERY {
            self.short_candidates(&query)
                .into_iter()
                .filter_map(|id| self.rank_exact(&query, id).map(|r| (r, 0, id)))
                .collect()
        } else {
            let mut overlap = vec![0u32; self.names.len()];
            for gram in &query_grams {
                if let Some(ids) = self.grams.get(gram) {
                    for &id in ids {
                        overlap[id as usize] += 1;
                    }
                }
            }
            let needed = (query_grams.len() as u32).div_ceil(2).max(1);
            overlap
                .iter()
                .enumerate()
                .filter(|&(_, &n)| n >= needed)
                .map(|(id, &n)| {
                    let id = id as u32;
                    match self.rank_exact(&query, id) {
                        Some(rank) => (rank, 0, id),
                        // Higher overlap first inside the fuzzy band.
                        None => (Rank::Fuzzy, u32::MAX - n, id),
                    }
                })
                .collect()
        };

        ranked.sort_unstable();
        ranked.truncate(limit);
        ranked.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Docs whose group equals `group`, ignoring case, in catalog order.
    pub fn by_group(&self, group: &str, limit: usize) -> Vec<u32> {
        self.group_postings
            .get(&group.trim().to_lowercase())
            .map(|ids| ids.iter().take(limit).copied().collect())
            .unwrap_or_default()
    }

    /// Answer one worker request.  Index builds replace `slot`.
    pub fn handle(slot: &mut Option<SearchIndex>, request: WorkerRequest) -> Option<WorkerResponse> {
        match request {
            WorkerRequest::BuildIndex { generation, docs } => {
                let index = SearchIndex::build(&docs, generation);
                let doc_count = index.len();
                *slot = Some(index);
                Some(WorkerResponse::IndexReady {
                    generation,
                    doc_count,
                })
            }
            WorkerRequest::Search {
                token,
                query,
                limit,
            } => Some(match slot {
                Some(index) => WorkerResponse::Results {
                    token,
                    generation: index.generation,
                    indices: index.search(&query, limit),
                },
                None => not_ready(token),
            }),
            WorkerRequest::ByGroup {
                token,
                group,
                limit,
            } => Some(match slot {
                Some(index) => WorkerResponse::Results {
                    token,
                    generation: index.generation,
                    indices: index.by_group(&group, limit),
                },
                None => not_ready(token),
            }),
            WorkerRequest::Shutdown => None,
        }
    }

    fn short_candidates(&self, query: &str) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .tokens
            .range(query.to_string()..)
            .take_while(|(word, _)| word.starts_with(query))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn rank_exact(&self, query: &str, id: u32) -> Option<Rank> {
        let name = &self.names[id as usize];
        if name.starts_with(query) {
            Some(Rank::NamePrefix)
        } else if name.contains(query) {
            Some(Rank::NameContains)
        } else if self.groups[id as usize].contains(query) {
            Some(Rank::GroupContains)
        } else {
            None
        }
    }
}

fn not_ready(token: u64) -> WorkerResponse {
    WorkerResponse::Error {
        token: Some(token),
        message: "index not built".into(),
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn trigrams(text: &str) -> Vec<Gram> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}
