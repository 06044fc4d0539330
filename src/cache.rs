//! Fan-out over the root index and any extra indexes, plus the shared file
//! cache.

use crate::file_cache::{Fetched, FileCache};
use crate::index::{IndexCache, IndexError};
use crate::models::File;
use std::collections::HashSet;
use tracing::info;

/// The proxy's top-level cache: one root index, any number of extra indexes
/// in priority order, and the on-disk file cache they share.
pub struct Cache {
    root: IndexCache,
    extras: Vec<IndexCache>,
    file_cache: FileCache,
}

impl Cache {
    pub fn new(root: IndexCache, extras: Vec<IndexCache>, file_cache: FileCache) -> Self {
        Self {
            root,
            extras,
            file_cache,
        }
    }

    pub fn file_cache(&self) -> &FileCache {
        &self.file_cache
    }

    /// Sorted union of the project names on every index.
    pub async fn list_projects(&self) -> Result<Vec<String>, IndexError> {
        let mut names: HashSet<String> = self.root.list_projects().await?.into_iter().collect();
        for extra in &self.extras {
            names.extend(extra.list_projects().await?);
        }
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        Ok(names)
    }

    /// Files of `project` across all indexes: the root's files first, then
    /// files from extras whose names are not already present. NotFound is
    /// surfaced only when every index misses.
    pub async fn list_files(&self, project: &str) -> Result<Vec<File>, IndexError> {
        let mut files: Vec<File> = Vec::new();
        let mut missing = None;
        match self.root.list_files(project).await {
            Ok(root_files) => files.extend(root_files),
            Err(IndexError::NotFound(name)) => missing = Some(IndexError::NotFound(name)),
            Err(err) => return Err(err),
        }
        let mut seen: HashSet<String> = files.iter().map(|file| file.name.clone()).collect();
        for extra in &self.extras {
            let extra_files = match extra.list_files(project).await {
                Ok(extra_files) => extra_files,
                Err(IndexError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            for file in extra_files {
                if seen.insert(file.name.clone()) {
                    files.push(file);
                }
            }
        }
        if files.is_empty()
            && let Some(err) = missing
        {
            return Err(err);
        }
        Ok(files)
    }

    /// Resolve `filename` in `project` to an upstream URL (first index that
    /// knows it wins) and fetch it through the file cache.
    pub async fn get_file(&self, project: &str, filename: &str) -> Result<Fetched, IndexError> {
        let mut url = None;
        let mut missing = None;
        match self.root.get_file_url(project, filename).await {
            Ok(resolved) => url = Some(resolved),
            Err(IndexError::NotFound(name)) => missing = Some(IndexError::NotFound(name)),
            Err(err) => return Err(err),
        }
        if url.is_none() {
            for extra in &self.extras {
                match extra.get_file_url(project, filename).await {
                    Ok(resolved) => {
                        url = Some(resolved);
                        break;
                    }
                    Err(IndexError::NotFound(_)) => continue,
                    Err(err) => return Err(err),
                }
            }
        }
        match url {
            Some(url) => Ok(self.file_cache.get(&url).await),
            None => Err(missing.unwrap_or_else(|| IndexError::NotFound(filename.to_string()))),
        }
    }

    /// Clear the project listings of every index.
    pub async fn invalidate_list(&self) {
        info!("invalidating project list cache");
        self.root.invalidate_list();
        for extra in &self.extras {
            extra.invalidate_list();
        }
    }

    /// Drop the cached file list of `project` on every index.
    pub async fn invalidate_project(&self, project: &str) {
        info!("invalidating project '{project}' file list cache");
        self.root.invalidate_project(project);
        for extra in &self.extras {
            extra.invalidate_project(project);
        }
    }
}
