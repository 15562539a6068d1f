use finch_core::prelude::*;

/// Composes independent backends into one [`PlatformServices`].
///
/// Lets the control plane and the artifact store come from different places, e.g. the HTTP
/// client for workspaces, compute and jobs plus an OpenDAL store reading outputs straight from blob storage.
#[derive(Clone)]
pub struct CoreServices<W, C, J, A> {
    pub workspace: W,
    pub compute: C,
    pub jobs: J,
    pub artifacts: A,
}

impl<W, C, J, A> PlatformServices for CoreServices<W, C, J, A>
where
    W: WorkspaceBackend,
    C: ComputeBackend,
    J: JobBackend,
    A: ArtifactStore,
{
    type Workspace = W;
    type Compute = C;
    type Jobs = J;
    type Artifacts = A;

    fn workspace(&self) -> &W {
        &self.workspace
    }
    fn compute(&self) -> &C {
        &self.compute
    }
    fn jobs(&self) -> &J {
        &self.jobs
    }
    fn artifacts(&self) -> &A {
        &self.artifacts
    }
}
